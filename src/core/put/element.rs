//! Element template and JavaScript uploads, global or widget-scoped.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use super::{SyncContext, cannot_update};
use crate::core::asset::AssetType;
use crate::core::error::PutOutcome;
use crate::core::transport::{ApiCall, Endpoint};

pub async fn put_element_file(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    asset: AssetType,
) -> Result<PutOutcome> {
    let global = matches!(
        asset,
        AssetType::GlobalElementTemplate | AssetType::GlobalElementJavascript
    );
    let template = matches!(
        asset,
        AssetType::GlobalElementTemplate | AssetType::ElementTemplate
    );

    let endpoint = match (global, template) {
        (true, true) => Endpoint::UpdateGlobalElementTemplate,
        (true, false) => Endpoint::UpdateGlobalElementJavaScript,
        (false, true) => Endpoint::UpdateFragmentTemplate,
        (false, false) => Endpoint::UpdateFragmentJavaScript,
    };
    if let Some(skip) = ctx.require(endpoint, rel) {
        return Ok(skip);
    }

    let Some(element) = ctx.resolver().element(rel, global)?.found() else {
        return Ok(cannot_update(rel));
    };

    let mut call = ApiCall::new();
    if !global {
        let Some(widget_id) = &element.widget_id else {
            return Ok(cannot_update(rel));
        };
        call = call.param(widget_id);
    }

    let field = if template { "template" } else { "javascript" };
    let call = call
        .param(&element.tag)
        .body(json!({ "code": { field: ctx.read(rel)? } }))
        .if_match(element.etag.as_deref());
    ctx.send(rel, endpoint, call).await
}
