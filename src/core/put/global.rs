//! Storefront-wide uploads: common text snippets and application JavaScript.

use std::path::Path;

use anyhow::Result;
use serde_json::{Map, Value, json};

use super::{SyncContext, cannot_update, file_name, parent_name};
use crate::core::error::PutOutcome;
use crate::core::layout::COMMON_NAMESPACE;
use crate::core::transport::{ApiCall, Endpoint};

/// Snippet files group keys by section; the server takes one flat map.
fn flatten_sections(file: Value) -> Map<String, Value> {
    let mut custom = Map::new();
    if let Value::Object(sections) = file {
        for (key, value) in sections {
            match value {
                Value::Object(inner) => custom.extend(inner),
                other => {
                    custom.insert(key, other);
                }
            }
        }
    }
    custom
}

/// `snippets/<locale>/snippets.json`
pub async fn put_global_snippets(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(locale) = parent_name(rel) else {
        return Ok(cannot_update(rel));
    };
    let etag = ctx.resolver().file_etag(rel)?;
    let body = json!({ "custom": flatten_sections(ctx.read_json(rel)?) });

    let (endpoint, call) = if ctx
        .transport
        .supports(Endpoint::UpdateCustomTranslationsForLocale)
    {
        (
            Endpoint::UpdateCustomTranslationsForLocale,
            ApiCall::new()
                .param(COMMON_NAMESPACE)
                .param(&locale),
        )
    } else {
        (
            Endpoint::UpdateCustomTranslations,
            ApiCall::new().param(COMMON_NAMESPACE),
        )
    };
    let call = call
        .locale(&locale)
        .body(body)
        .if_match(etag.as_deref());
    ctx.send(rel, endpoint, call).await
}

pub async fn put_application_javascript(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::UpdateApplicationJavaScript, rel) {
        return Ok(skip);
    }
    let etag = ctx.resolver().file_etag(rel)?;
    let call = ApiCall::new()
        .param(file_name(rel))
        .body(json!({ "source": ctx.read(rel)? }))
        .if_match(etag.as_deref());
    ctx.send(rel, Endpoint::UpdateApplicationJavaScript, call)
        .await
}
