//! Shared test utilities for integration tests
//!
//! An in-memory transport that records every call, plus helpers that lay
//! out a grabbed content tree the way `ccs grab` leaves it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use assert_fs::prelude::*;
use async_trait::async_trait;
use serde_json::{Value, json};

use ccsync::core::model::Locale;
use ccsync::core::sidecar::{
    ConfigRecord, SidecarRecord, SidecarStore, WidgetInstanceRecord, WidgetRecord,
};
use ccsync::core::transport::{ApiCall, ApiResponse, Endpoint, Transport};
use ccsync::infra::io::ContentRoot;

pub const SOURCE_NODE: &str = "https://source.example";
pub const DEST_NODE: &str = "https://dest.example";
pub const BUILD: &str = "22.4.1";

/// Canned responses keyed by endpoint, optionally narrowed by params or
/// query string. Anything unconfigured answers `200 {"items": []}`.
/// Sequenced responses take precedence and repeat their last entry.
pub struct FakeTransport
{
    node: String,
    version: Option<String>,
    locales: Vec<Locale>,
    unsupported: HashSet<Endpoint>,
    by_endpoint: HashMap<Endpoint, ApiResponse>,
    by_params: HashMap<(Endpoint, Vec<String>), ApiResponse>,
    by_query: HashMap<(Endpoint, String), ApiResponse>,
    urls: HashMap<String, String>,
    sequences: Mutex<HashMap<Endpoint, VecDeque<ApiResponse>>>,
    calls: Mutex<Vec<(Endpoint, ApiCall)>>,
}

impl FakeTransport
{
    pub fn new(node: &str) -> Self
    {
        Self {
            node: node.to_string(),
            version: Some(BUILD.to_string()),
            locales: vec![Locale { name: "en".into(), ..Default::default() }],
            unsupported: HashSet::new(),
            by_endpoint: HashMap::new(),
            by_params: HashMap::new(),
            by_query: HashMap::new(),
            urls: HashMap::new(),
            sequences: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn version(
        mut self,
        version: &str,
    ) -> Self
    {
        self.version = Some(version.to_string());
        self
    }

    pub fn locales(
        mut self,
        names: &[&str],
    ) -> Self
    {
        self.locales = names
            .iter()
            .map(|n| Locale { name: n.to_string(), ..Default::default() })
            .collect();
        self
    }

    pub fn without(
        mut self,
        endpoint: Endpoint,
    ) -> Self
    {
        self.unsupported
            .insert(endpoint);
        self
    }

    pub fn respond(
        mut self,
        endpoint: Endpoint,
        resp: ApiResponse,
    ) -> Self
    {
        self.by_endpoint
            .insert(endpoint, resp);
        self
    }

    pub fn respond_to(
        mut self,
        endpoint: Endpoint,
        params: &[&str],
        resp: ApiResponse,
    ) -> Self
    {
        let key = (
            endpoint,
            params
                .iter()
                .map(|p| p.to_string())
                .collect(),
        );
        self.by_params
            .insert(key, resp);
        self
    }

    pub fn respond_query(
        mut self,
        endpoint: Endpoint,
        query: &str,
        resp: ApiResponse,
    ) -> Self
    {
        self.by_query
            .insert((endpoint, query.to_string()), resp);
        self
    }

    /// Answer successive calls to `endpoint` with `responses`, in order.
    pub fn respond_in_turn(
        self,
        endpoint: Endpoint,
        responses: Vec<ApiResponse>,
    ) -> Self
    {
        self.sequences
            .lock()
            .unwrap()
            .insert(endpoint, responses.into());
        self
    }

    pub fn url(
        mut self,
        url: &str,
        body: &str,
    ) -> Self
    {
        self.urls
            .insert(url.to_string(), body.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(Endpoint, ApiCall)>
    {
        self.calls
            .lock()
            .unwrap()
            .clone()
    }

    pub fn calls_to(
        &self,
        endpoint: Endpoint,
    ) -> Vec<ApiCall>
    {
        self.calls()
            .into_iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, c)| c)
            .collect()
    }

    /// Calls to write endpoints (anything not a read).
    pub fn writes(&self) -> Vec<(Endpoint, ApiCall)>
    {
        self.calls()
            .into_iter()
            .filter(|(e, _)| {
                let name = e.name();
                !(name.starts_with("get") || name.starts_with("list"))
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport
{
    fn supports(
        &self,
        endpoint: Endpoint,
    ) -> bool
    {
        !self
            .unsupported
            .contains(&endpoint)
    }

    async fn call(
        &self,
        endpoint: Endpoint,
        call: ApiCall,
    ) -> Result<ApiResponse>
    {
        let key = (endpoint, call.params.clone());
        let query = (
            endpoint,
            call.query
                .clone()
                .unwrap_or_default(),
        );
        self.calls
            .lock()
            .unwrap()
            .push((endpoint, call));

        if let Some(queue) = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(&endpoint)
        {
            let next = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
            if let Some(resp) = next
            {
                return Ok(resp);
            }
        }

        Ok(self
            .by_params
            .get(&key)
            .or_else(|| {
                self.by_query
                    .get(&query)
            })
            .or_else(|| {
                self.by_endpoint
                    .get(&endpoint)
            })
            .cloned()
            .unwrap_or_else(|| ApiResponse::ok(json!({ "items": [] }))))
    }

    async fn fetch_url(
        &self,
        url: &str,
    ) -> Result<ApiResponse>
    {
        match self
            .urls
            .get(url)
        {
            Some(body) => Ok(ApiResponse::ok(Value::String(body.clone()))),
            None => Ok(ApiResponse::ok(Value::Null).with_status(404)),
        }
    }

    fn repository_version(&self) -> Option<&str>
    {
        self.version
            .as_deref()
    }

    fn locales(&self) -> &[Locale]
    {
        &self.locales
    }

    fn locale(&self) -> &str
    {
        self.locales
            .first()
            .map(|l| l.name.as_str())
            .unwrap_or("en")
    }

    fn node(&self) -> &str
    {
        &self.node
    }
}

pub fn items(values: Vec<Value>) -> ApiResponse
{
    ApiResponse::ok(json!({ "items": values }))
}

/// A content root with a config record naming `node`.
pub fn grabbed_tree(node: &str) -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    let store = store(tmp.path());
    store
        .root()
        .make_tracked_dir(Path::new(""))
        .expect("tracking dir");
    store
        .write(
            Path::new(""),
            &ConfigRecord {
                node: node.to_string(),
                repository_version: Some(BUILD.to_string()),
                ..Default::default()
            },
        )
        .expect("config record");
    tmp
}

pub fn store(root: &Path) -> SidecarStore
{
    SidecarStore::new(ContentRoot::new(root))
}

/// Sidecar for the entity owning `rel`.
pub fn record<R: SidecarRecord>(
    tmp: &assert_fs::TempDir,
    rel: &str,
    record: &R,
)
{
    store(tmp.path())
        .write(Path::new(rel), record)
        .expect("sidecar");
}

pub fn etag(
    tmp: &assert_fs::TempDir,
    rel: &str,
    token: &str,
)
{
    store(tmp.path())
        .etags()
        .write(Path::new(rel), token)
        .expect("etag");
}

pub fn read_etag(
    tmp: &assert_fs::TempDir,
    rel: &str,
) -> Option<String>
{
    store(tmp.path())
        .etags()
        .read(Path::new(rel))
        .expect("etag read")
}

/// `widget/<name>` with its record and a main JS file.
pub fn widget(
    tmp: &assert_fs::TempDir,
    name: &str,
    repository_id: &str,
    version: i64,
)
{
    tmp.child(format!("widget/{name}/js/{}.js", name.to_lowercase().replace(' ', "")))
        .write_str("define([], function () { return {}; });\n")
        .expect("write js");
    record(
        tmp,
        &format!("widget/{name}"),
        &WidgetRecord {
            repository_id: repository_id.into(),
            widget_type: name.replace(' ', ""),
            version,
            display_name: name.into(),
            source: Some(101),
            ..Default::default()
        },
    );
}

/// `widget/<widget>/instances/<name>` with its record and a template.
pub fn instance(
    tmp: &assert_fs::TempDir,
    widget: &str,
    name: &str,
    repository_id: &str,
    descriptor_repository_id: &str,
    version: i64,
)
{
    let dir = format!("widget/{widget}/instances/{name}");
    tmp.child(format!("{dir}/display.template"))
        .write_str("<div data-bind=\"text: title\"></div>\n")
        .expect("write template");
    record(
        tmp,
        &dir,
        &WidgetInstanceRecord {
            repository_id: repository_id.into(),
            descriptor_repository_id: descriptor_repository_id.into(),
            version,
            display_name: name.into(),
            ..Default::default()
        },
    );
}

pub fn descriptor(
    repository_id: &str,
    display_name: &str,
    version: i64,
) -> Value
{
    json!({
        "repositoryId": repository_id,
        "displayName": display_name,
        "widgetType": display_name.replace(' ', ""),
        "version": version,
        "editableWidget": true,
        "jsEditable": true,
        "source": 101,
    })
}

pub fn widget_instance(
    repository_id: &str,
    display_name: &str,
    descriptor: Value,
) -> Value
{
    json!({
        "repositoryId": repository_id,
        "displayName": display_name,
        "descriptor": descriptor,
    })
}
