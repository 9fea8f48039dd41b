//! Filepath: src/infra/http.rs
//! HTTP transport against the admin REST interface.
//! - Logs in with the application key; the session token is renewed once it
//!   is older than the configured refresh interval
//! - Endpoint URLs and methods come from the server's registry, so every
//!   [`Endpoint`] the registry lacks reports as unsupported
//! - Locales are fixed at connect time (configured, default, or all)

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, HeaderMap};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::error::SyncError;
use crate::core::model::{Locale, LocaleList};
use crate::core::transport::{ApiCall, ApiResponse, Endpoint, Transport};

/// Path prefix of the application-key flavour of the admin interface
const ADMIN_BASE: &str = "/ccadmin/v1/";
const PROFILE_HEADER: &str = "X-CCProfileType";
const PROFILE_TYPE: &str = "applicationAccess";
const LANGUAGE_HEADER: &str = "X-CCAsset-Language";
const IF_MATCH_HEADER: &str = "If-Match";
const VERSION_HEADER: &str = "oraclecommercecloud-version";

/// Connection settings for one node.
#[derive(Debug, Clone)]
pub struct HttpSettings
{
    pub node: String,
    pub application_key: String,
    pub token_refresh: Duration,
    /// Work in this locale only
    pub locale: Option<String>,
    /// Work in every locale the server offers
    pub all_locales: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EndpointInfo
{
    method: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Registry
{
    #[serde(rename = "endpointMap", default)]
    endpoint_map: HashMap<String, EndpointInfo>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse
{
    access_token: String,
}

#[derive(Debug)]
struct Session
{
    token: String,
    obtained: Instant,
}

pub struct HttpTransport
{
    client: Client,
    settings: HttpSettings,
    session: Mutex<Option<Session>>,
    endpoints: HashMap<String, EndpointInfo>,
    repository_version: Option<String>,
    locales: Vec<Locale>,
    locale: String,
}

impl HttpTransport
{
    /// Log in, load the endpoint registry and settle the locales.
    pub async fn connect(settings: HttpSettings) -> Result<Self>
    {
        let client = Client::builder()
            .user_agent(concat!("ccsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let mut transport = Self {
            client,
            settings,
            session: Mutex::new(None),
            endpoints: HashMap::new(),
            repository_version: None,
            locales: Vec::new(),
            locale: String::new(),
        };

        transport
            .token()
            .await?;
        transport
            .load_registry()
            .await?;

        if !transport.supports(Endpoint::ListLocales)
        {
            return Err(SyncError::Registry {
                node: transport.settings.node.clone(),
                message: "not an administration interface".into(),
            }
            .into());
        }
        let resp = transport
            .call(Endpoint::ListLocales, ApiCall::new())
            .await?;
        let list: LocaleList = resp.parse(Endpoint::ListLocales)?;
        let (locales, locale) = choose_locales(
            list,
            transport
                .settings
                .locale
                .as_deref(),
            transport
                .settings
                .all_locales,
        )?;
        info!(node = %transport.settings.node, locale = %locale, count = locales.len(), "connected");
        transport.locales = locales;
        transport.locale = locale;
        Ok(transport)
    }

    fn url(
        &self,
        path: &str,
    ) -> String
    {
        if path.starts_with("http://") || path.starts_with("https://")
        {
            return path.to_string();
        }
        format!(
            "{}{}",
            self.settings
                .node
                .trim_end_matches('/'),
            path
        )
    }

    async fn login(&self) -> Result<Session>
    {
        let url = self.url(&format!("{ADMIN_BASE}login/"));
        debug!(%url, "logging in");
        let fail = |message: String| SyncError::Login {
            node: self
                .settings
                .node
                .clone(),
            message,
        };

        let resp = self
            .client
            .post(&url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.settings.application_key),
            )
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if !resp
            .status()
            .is_success()
        {
            return Err(fail(format!("HTTP {}", resp.status())).into());
        }
        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(Session { token: login.access_token, obtained: Instant::now() })
    }

    /// Current bearer token, logging in again when it has aged out.
    async fn token(&self) -> Result<String>
    {
        let mut session = self
            .session
            .lock()
            .await;
        let fresh = session
            .as_ref()
            .is_some_and(|s| {
                s.obtained
                    .elapsed()
                    < self
                        .settings
                        .token_refresh
            });
        if !fresh
        {
            *session = Some(
                self.login()
                    .await?,
            );
        }
        session
            .as_ref()
            .map(|s| {
                s.token
                    .clone()
            })
            .context("no session after login")
    }

    async fn load_registry(&mut self) -> Result<()>
    {
        let fail = |message: String| SyncError::Registry {
            node: self
                .settings
                .node
                .clone(),
            message,
        };
        let token = self
            .token()
            .await?;
        let url = self.url(&format!("{ADMIN_BASE}registry"));
        let resp = self
            .authorized(Method::GET, &url, &token)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !resp
            .status()
            .is_success()
        {
            return Err(fail(format!("HTTP {}", resp.status())).into());
        }

        let version = header(resp.headers(), VERSION_HEADER);
        let registry: Registry = resp
            .json()
            .await
            .map_err(|e| fail(e.to_string()))?;
        debug!(endpoints = registry.endpoint_map.len(), version = ?version, "registry loaded");
        self.endpoints = registry.endpoint_map;
        self.repository_version = version;
        Ok(())
    }

    fn authorized(
        &self,
        method: Method,
        url: &str,
        token: &str,
    ) -> RequestBuilder
    {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(PROFILE_HEADER, PROFILE_TYPE)
    }
}

fn header(
    headers: &HeaderMap,
    name: &str,
) -> Option<String>
{
    headers
        .get(name)
        .and_then(|v| {
            v.to_str()
                .ok()
        })
        .map(str::to_string)
}

/// Fill `{}` placeholders in order, then append the query string.
pub fn expand_template(
    template: &str,
    params: &[String],
    query: Option<&str>,
) -> String
{
    let mut url = template.to_string();
    for param in params
    {
        if let Some(at) = url.find("{}")
        {
            url.replace_range(at..at + 2, param);
        }
    }
    if let Some(query) = query.filter(|q| !q.is_empty())
    {
        url.push('?');
        url.push_str(query.trim_start_matches('?'));
    }
    url
}

/// Locales for the run and the working locale.
///
/// The server default is used unless it is `en_US`, which carries no text of
/// its own; then the two-letter language is used when offered.
pub fn choose_locales(
    list: LocaleList,
    requested: Option<&str>,
    all: bool,
) -> Result<(Vec<Locale>, String)>
{
    let default = list
        .default_locale
        .clone()
        .or_else(|| {
            list.items
                .first()
                .cloned()
        })
        .context("server reports no locales")?;

    let chosen = if all
    {
        list.items
    }
    else if let Some(name) = requested
    {
        match list
            .items
            .into_iter()
            .find(|l| l.name == name)
        {
            Some(l) => vec![l],
            None => bail!("locale {name} is not supported by the server"),
        }
    }
    else if default.name == "en_US"
    {
        let short = list
            .items
            .iter()
            .find(|l| l.name == "en")
            .cloned();
        vec![short.unwrap_or_else(|| default.clone())]
    }
    else
    {
        vec![default.clone()]
    };

    let working = match chosen.as_slice()
    {
        [only] => only
            .name
            .clone(),
        _ => default.name,
    };
    Ok((chosen, working))
}

/// Body as JSON, or as a JSON string when it is not JSON.
fn decode_body(text: String) -> Value
{
    if text
        .trim()
        .is_empty()
    {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl Transport for HttpTransport
{
    fn supports(
        &self,
        endpoint: Endpoint,
    ) -> bool
    {
        self.endpoints
            .contains_key(endpoint.name())
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        call: ApiCall,
    ) -> Result<ApiResponse>
    {
        let Some(info) = self
            .endpoints
            .get(endpoint.name())
        else
        {
            bail!("server does not offer {endpoint}");
        };
        let method = Method::from_bytes(
            info.method
                .to_uppercase()
                .as_bytes(),
        )
        .with_context(|| format!("bad method {} for {endpoint}", info.method))?;
        let url = self.url(&expand_template(&info.url, &call.params, call.query.as_deref()));
        debug!(%endpoint, %method, %url, "calling");

        let token = self
            .token()
            .await?;
        let language = call
            .locale
            .as_deref()
            .unwrap_or(&self.locale);
        let mut req = self
            .authorized(method, &url, &token)
            .header(LANGUAGE_HEADER, language);
        if let Some(etag) = &call.etag
        {
            req = req.header(IF_MATCH_HEADER, etag);
        }
        if let Some(body) = &call.body
        {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("{endpoint} request failed"))?;
        let status = resp
            .status()
            .as_u16();
        let etag = header(resp.headers(), ETAG.as_str());
        let text = resp
            .text()
            .await
            .with_context(|| format!("Failed to read {endpoint} response"))?;
        debug!(%endpoint, status, "response");
        Ok(ApiResponse { status, etag, data: decode_body(text) })
    }

    async fn fetch_url(
        &self,
        url: &str,
    ) -> Result<ApiResponse>
    {
        let token = self
            .token()
            .await?;
        let url = self.url(url);
        let resp = self
            .authorized(Method::GET, &url, &token)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        let status = resp
            .status()
            .as_u16();
        let etag = header(resp.headers(), ETAG.as_str());
        let text = resp
            .text()
            .await
            .with_context(|| format!("Failed to read {url}"))?;
        Ok(ApiResponse { status, etag, data: Value::String(text) })
    }

    fn repository_version(&self) -> Option<&str>
    {
        self.repository_version
            .as_deref()
    }

    fn locales(&self) -> &[Locale]
    {
        &self.locales
    }

    fn locale(&self) -> &str
    {
        &self.locale
    }

    fn node(&self) -> &str
    {
        &self
            .settings
            .node
    }
}
