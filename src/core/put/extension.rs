//! Widget creation through an extension upload.
//!
//! Widget descriptors cannot be created directly. Instead the widget's base
//! files are packed into an extension archive, uploaded as a single file
//! segment and installed with `createExtension`. Instances are not part of
//! the archive; they are created afterwards by their own files.

use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::SyncContext;
use crate::core::error::PutOutcome;
use crate::core::layout::{
    CONFIG_DIR, CONFIG_METADATA_JSON, INSTANCES_DIR, JS_DIR, LOCALES_DIR, VERSION_DIR,
    WIDGET_LESS, WIDGET_METADATA_JSON, WIDGET_TEMPLATE, WIDGETS_DIR, sanitize_name,
};
use crate::core::sidecar::WidgetRecord;
use crate::core::transport::{ApiCall, ApiResponse, Endpoint};
use crate::infra::walk::ContentWalker;

/// Everything an extension install needs from the server.
pub const EXTENSION_ENDPOINTS: [Endpoint; 4] = [
    Endpoint::CreateApplicationId,
    Endpoint::StartFileUpload,
    Endpoint::DoFileSegmentUpload,
    Endpoint::CreateExtension,
];

const DEVELOPER_ID: &str = "999";
const CREATED_BY: &str = "ccs";

/// `createExtension` result.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InstallResult {
    success: bool,
    errors: Vec<Value>,
    warnings: Vec<Value>,
}

fn messages(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Where a widget file lands under `widget/<type>/` in the archive, given
/// its path inside the widget directory. Files with no place are left out.
pub fn extension_path(inner: &Path) -> Option<String> {
    let parts: Vec<&str> = inner
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;

    match parts.as_slice() {
        [WIDGET_TEMPLATE] => Some(format!("templates/{WIDGET_TEMPLATE}")),
        [WIDGET_LESS] => Some(format!("less/{WIDGET_LESS}")),
        [LOCALES_DIR, locale, file] if file.ends_with(".json") => {
            Some(format!("{LOCALES_DIR}/{locale}/{file}"))
        }
        [JS_DIR, file] if file.ends_with(".js") => Some(format!("{JS_DIR}/{file}")),
        [CONFIG_DIR, CONFIG_METADATA_JSON] => Some(format!("{CONFIG_DIR}/config.json")),
        [CONFIG_DIR, LOCALES_DIR, file] if file.ends_with(".json") => {
            Some(format!("{CONFIG_DIR}/{LOCALES_DIR}/{file}"))
        }
        _ => None,
    }
}

/// `widget.json`: the user's widget metadata plus what the server recorded.
pub fn widget_json(metadata: Option<Value>, record: &WidgetRecord) -> Value {
    let mut widget = match metadata {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    widget.insert("widgetType".into(), json!(record.widget_type));
    widget.insert("global".into(), json!(record.global.unwrap_or(false)));
    if let Some(js) = &record.javascript {
        widget.insert("javascript".into(), json!(js));
    }
    if let Some(resources) = &record.i18nresources {
        widget.insert("i18nresources".into(), json!(resources));
    }
    if record.global == Some(true) {
        widget.insert("name".into(), json!(record.display_name));
    }
    Value::Object(widget)
}

/// `ext.json` describing the extension itself.
pub fn ext_json(extension_id: &str, record: &WidgetRecord) -> Value {
    json!({
        "extensionID": extension_id,
        "developerID": DEVELOPER_ID,
        "createdBy": CREATED_BY,
        "name": record.display_name,
        "version": 1,
        "timeCreated": Utc::now().format("%Y-%m-%d").to_string(),
        "description": record.display_name,
    })
}

/// Zip `(path, contents)` pairs in memory.
pub fn pack(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .with_context(|| format!("Failed to add {name} to the extension"))?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Archive entries for the widget directory `rel`.
fn archive_entries(
    ctx: &SyncContext<'_>,
    rel: &Path,
    record: &WidgetRecord,
    extension_id: &str,
) -> Result<Vec<(String, Vec<u8>)>> {
    let root = ctx.root();
    let dir = root.absolute(rel);
    let pruned: Vec<PathBuf> = [INSTANCES_DIR, VERSION_DIR]
        .into_iter()
        .map(|d| dir.join(d))
        .collect();
    let base = format!("{WIDGETS_DIR}/{}", record.widget_type);

    let mut entries = vec![(
        "ext.json".to_string(),
        serde_json::to_vec_pretty(&ext_json(extension_id, record))?,
    )];

    for entry in ContentWalker::new()
        .walk_with_filter(&dir, move |p, is_dir| !(is_dir && pruned.iter().any(|d| d == p)))
        .into_iter()
        .filter(|e| !e.is_dir)
    {
        let file = root.relative(&entry.path)?;
        let Ok(inner) = file.strip_prefix(rel) else {
            continue;
        };
        if let Some(target) = extension_path(inner) {
            entries.push((format!("{base}/{target}"), root.read(&file)?.into_bytes()));
        }
    }

    let metadata = match root.read_opt(&rel.join(WIDGET_METADATA_JSON))? {
        Some(text) => Some(
            serde_json::from_str(&text)
                .with_context(|| format!("{WIDGET_METADATA_JSON} is not valid JSON"))?,
        ),
        None => None,
    };
    entries.push((
        format!("{base}/widget.json"),
        serde_json::to_vec_pretty(&widget_json(metadata, record))?,
    ));
    Ok(entries)
}

/// Call `endpoint` and hand back the response, or a failure outcome.
async fn step(
    ctx: &SyncContext<'_>,
    endpoint: Endpoint,
    call: ApiCall,
) -> Result<Result<ApiResponse, PutOutcome>> {
    let resp = ctx.transport.call(endpoint, call).await?;
    if resp.is_success() {
        return Ok(Ok(resp));
    }
    let message = resp.message();
    warn!(%endpoint, status = resp.status, %message, "extension upload step failed");
    Ok(Err(PutOutcome::Failed(format!("{endpoint} failed: {message}"))))
}

/// Pack, upload and install the widget in `rel`.
pub async fn create_widget(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    record: &WidgetRecord,
) -> Result<PutOutcome> {
    info!(widget = %record.display_name, "creating widget as an extension");

    let resp = match step(
        ctx,
        Endpoint::CreateApplicationId,
        ApiCall::new().body(json!({ "name": record.display_name, "type": "extension" })),
    )
    .await?
    {
        Ok(resp) => resp,
        Err(outcome) => return Ok(outcome),
    };
    let Some(extension_id) = resp.field("id").map(str::to_string) else {
        return Ok(PutOutcome::Failed("the server returned no extension id".into()));
    };

    let archive = pack(&archive_entries(ctx, rel, record, &extension_id)?)?;
    let vfs_name = format!(
        "{}_ccw_{}.zip",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        sanitize_name(&record.widget_type)
    );
    let filename = format!("/extensions/{vfs_name}");

    let resp = match step(
        ctx,
        Endpoint::StartFileUpload,
        ApiCall::new().body(json!({ "filename": filename, "segments": 1 })),
    )
    .await?
    {
        Ok(resp) => resp,
        Err(outcome) => return Ok(outcome),
    };
    let Some(token) = resp.field("token").map(str::to_string) else {
        return Ok(PutOutcome::Failed("the server returned no upload token".into()));
    };

    let upload = ApiCall::new()
        .param(token)
        .query("?changeContext=designStudio")
        .body(json!({ "filename": filename, "file": STANDARD.encode(&archive), "index": 0 }));
    if let Err(outcome) = step(ctx, Endpoint::DoFileSegmentUpload, upload).await? {
        return Ok(outcome);
    }

    let resp = match step(
        ctx,
        Endpoint::CreateExtension,
        ApiCall::new().body(json!({ "name": vfs_name })),
    )
    .await?
    {
        Ok(resp) => resp,
        Err(outcome) => return Ok(outcome),
    };
    let result: InstallResult = resp.parse(Endpoint::CreateExtension)?;
    for warning in messages(&result.warnings) {
        warn!(widget = %record.display_name, %warning, "extension installed with a warning");
    }
    if !result.success {
        let errors = messages(&result.errors).join("; ");
        warn!(widget = %record.display_name, %errors, "extension was not installed");
        return Ok(PutOutcome::Failed(format!("extension was not installed: {errors}")));
    }

    ctx.snapshot.refresh_descriptors(ctx.transport).await?;
    if !ctx.run.transfer_mode {
        match ctx.snapshot.latest_descriptor(&record.display_name) {
            Some(descriptor) => {
                let patch = [("repositoryId".to_string(), json!(descriptor.repository_id))]
                    .into_iter()
                    .collect();
                ctx.sidecar.update::<WidgetRecord>(rel, patch)?;
            }
            None => warn!(widget = %record.display_name, "installed widget not listed by the server"),
        }
        ctx.sidecar.etags().reset_tree(rel)?;
    }
    info!(widget = %record.display_name, extension = %extension_id, "widget created");
    Ok(PutOutcome::Applied)
}
