//! Transport seam: named remote endpoints behind an async trait.
//!
//! The sync engine never builds URLs or handles credentials. It names an
//! [`Endpoint`], fills in an [`ApiCall`] and gets an [`ApiResponse`] back.
//! [`crate::infra::http::HttpTransport`] is the real implementation; tests
//! use an in-memory one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::model::Locale;

macro_rules! endpoints {
    ($($variant:ident => $name:literal,)+) => {
        /// Remote operations, named as the server's endpoint registry names them.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Endpoint {
            $($variant,)+
        }

        impl Endpoint {
            pub const ALL: &'static [Endpoint] = &[$(Endpoint::$variant,)+];

            /// Registry operation id
            pub fn name(self) -> &'static str {
                match self {
                    $(Endpoint::$variant => $name,)+
                }
            }
        }
    };
}

endpoints! {
    ListLocales => "listLocales",

    ListWidgets => "listWidgets",
    GetAllWidgetInstances => "getAllWidgetInstances",
    GetAllWidgetDescriptors => "getAllWidgetDescriptors",
    GetWidget => "getWidget",
    CreateWidgetInstance => "createWidgetInstance",

    GetWidgetSourceCode => "getWidgetSourceCode",
    UpdateWidgetSourceCode => "updateWidgetSourceCode",
    GetWidgetLess => "getWidgetLess",
    UpdateWidgetLess => "updateWidgetLess",
    GetWidgetLocaleContent => "getWidgetLocaleContent",
    GetWidgetLocaleContentForLocale => "getWidgetLocaleContentForLocale",
    UpdateWidgetCustomTranslations => "updateWidgetCustomTranslations",
    UpdateWidgetCustomTranslationsForLocale => "updateWidgetCustomTranslationsForLocale",
    GetWidgetWebContent => "getWidgetWebContent",
    UpdateWidgetWebContent => "updateWidgetWebContent",
    GetWidgetMetadata => "getWidgetMetadata",
    UpdateWidgetMetadata => "updateWidgetMetadata",

    GetWidgetDescriptorJavascriptInfoById => "getWidgetDescriptorJavascriptInfoById",
    GetWidgetDescriptorJavascriptExtensionInfoById => "getWidgetDescriptorJavascriptExtensionInfoById",
    UpdateWidgetDescriptorJavascript => "updateWidgetDescriptorJavascript",
    UpdateWidgetDescriptorJavascriptExtension => "updateWidgetDescriptorJavascriptExtension",
    CreateWidgetDescriptorJavascriptExtension => "createWidgetDescriptorJavascriptExtension",
    GetWidgetDescriptorMetadata => "getWidgetDescriptorMetadata",
    UpdateWidgetDescriptorMetadata => "updateWidgetDescriptorMetadata",
    GetWidgetDescriptorBaseTemplate => "getWidgetDescriptorBaseTemplate",
    UpdateWidgetDescriptorBaseTemplate => "updateWidgetDescriptorBaseTemplate",
    GetWidgetDescriptorBaseLess => "getWidgetDescriptorBaseLess",
    UpdateWidgetDescriptorBaseLess => "updateWidgetDescriptorBaseLess",
    GetWidgetDescriptorBaseLocaleContent => "getWidgetDescriptorBaseLocaleContent",
    UpdateWidgetDescriptorBaseLocaleContent => "updateWidgetDescriptorBaseLocaleContent",
    GetConfigMetadataForWidgetDescriptor => "getConfigMetadataForWidgetDescriptor",
    UpdateConfigMetadataForWidgetDescriptor => "updateConfigMetadataForWidgetDescriptor",
    GetConfigLocaleContentForWidgetDescriptor => "getConfigLocaleContentForWidgetDescriptor",
    UpdateConfigLocaleContentForWidgetDescriptor => "updateConfigLocaleContentForWidgetDescriptor",

    GetElements => "getElements",
    GetFragmentTemplate => "getFragmentTemplate",
    UpdateFragmentTemplate => "updateFragmentTemplate",
    GetFragmentJavaScript => "getFragmentJavaScript",
    UpdateFragmentJavaScript => "updateFragmentJavaScript",
    GetGlobalElementTemplate => "getGlobalElementTemplate",
    UpdateGlobalElementTemplate => "updateGlobalElementTemplate",
    GetGlobalElementJavaScript => "getGlobalElementJavaScript",
    UpdateGlobalElementJavaScript => "updateGlobalElementJavaScript",

    GetAllStackInstances => "getAllStackInstances",
    GetStackSourceCode => "getStackSourceCode",
    UpdateStackSourceCode => "updateStackSourceCode",
    GetStackLessVars => "getStackLessVars",
    UpdateStackLessVars => "updateStackLessVars",
    GetStackLess => "getStackLess",
    UpdateStackLess => "updateStackLess",

    GetThemes => "getThemes",
    GetThemeSource => "getThemeSource",
    UpdateThemeSource => "updateThemeSource",
    CreateTheme => "createTheme",

    GetResourceStrings => "getResourceStrings",
    GetResourceStringsForLocale => "getResourceStringsForLocale",
    UpdateCustomTranslations => "updateCustomTranslations",
    UpdateCustomTranslationsForLocale => "updateCustomTranslationsForLocale",

    CreateApplicationId => "createApplicationID",
    StartFileUpload => "startFileUpload",
    DoFileSegmentUpload => "doFileSegmentUpload",
    CreateExtension => "createExtension",

    GetAllApplicationJavaScript => "getAllApplicationJavaScript",
    GetApplicationJavaScript => "getApplicationJavaScript",
    UpdateApplicationJavaScript => "updateApplicationJavaScript",
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments for one endpoint call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiCall {
    /// Substituted, in order, for the `{}` placeholders of the URL template
    pub params: Vec<String>,
    /// Raw query string, with or without the leading `?`
    pub query: Option<String>,
    pub body: Option<Value>,
    /// Sent as `If-Match` (optimistic lock)
    pub etag: Option<String>,
    /// Sent as the asset-language header
    pub locale: Option<String>,
}

impl ApiCall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, p: impl Into<String>) -> Self {
        self.params.push(p.into());
        self
    }

    pub fn query(mut self, q: impl Into<String>) -> Self {
        self.query = Some(q.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn if_match(mut self, etag: Option<&str>) -> Self {
        self.etag = etag.map(str::to_string);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

/// What came back from the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub data: Value,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self { status: 200, etag: None, data }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Error code some endpoints embed in an otherwise successful body
    pub fn error_code(&self) -> Option<&str> {
        self.data
            .get("errorCode")
            .and_then(Value::as_str)
    }

    pub fn message(&self) -> String {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }

    /// 2xx and no embedded error code.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error_code().is_none()
    }

    /// A string field of the body.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data
            .get(name)
            .and_then(Value::as_str)
    }

    /// Deserialize the body, failing unless the call succeeded.
    pub fn parse<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T> {
        if !self.is_success() {
            anyhow::bail!("{endpoint} failed: {}", self.message());
        }
        serde_json::from_value(self.data.clone())
            .with_context(|| format!("Unexpected {endpoint} response"))
    }
}

/// Access to one remote installation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the server offers `endpoint` (older servers lack some).
    fn supports(&self, endpoint: Endpoint) -> bool;

    async fn call(&self, endpoint: Endpoint, call: ApiCall) -> Result<ApiResponse>;

    /// Plain GET of an absolute or server-relative URL (e.g. JS file links).
    async fn fetch_url(&self, url: &str) -> Result<ApiResponse>;

    /// Server build identifier, if reported
    fn repository_version(&self) -> Option<&str>;

    /// Locales to work with for this run
    fn locales(&self) -> &[Locale];

    /// Working locale for single-locale operations
    fn locale(&self) -> &str;

    /// Node this transport talks to
    fn node(&self) -> &str;
}

/// Call a collection endpoint and unwrap its `items`.
pub async fn fetch_items<T: DeserializeOwned>(
    transport: &dyn Transport,
    endpoint: Endpoint,
    call: ApiCall,
) -> Result<Vec<T>> {
    let resp = transport.call(endpoint, call).await?;
    Ok(resp
        .parse::<crate::core::model::Items<T>>(endpoint)?
        .items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_error_code_is_failure() {
        let resp = ApiResponse::ok(json!({"errorCode": "20031", "message": "bad"}));
        assert!(!resp.is_success());
        assert_eq!(resp.message(), "bad");
        assert!(ApiResponse::ok(json!({})).is_success());
        assert!(!ApiResponse::ok(json!({})).with_status(412).is_success());
    }

    #[test]
    fn endpoint_names_are_unique() {
        let mut names: Vec<_> = Endpoint::ALL.iter().map(|e| e.name()).collect();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
    }

    #[test]
    fn call_builder() {
        let call = ApiCall::new()
            .param("w1")
            .param("cart.js")
            .query("?updateInstances=true")
            .if_match(Some("tok"))
            .locale("en");
        assert_eq!(call.params, vec!["w1", "cart.js"]);
        assert_eq!(call.etag.as_deref(), Some("tok"));
        assert_eq!(call.locale.as_deref(), Some("en"));
    }
}
