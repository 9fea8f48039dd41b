//! Stack instance uploads.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use super::{SyncContext, cannot_update};
use crate::core::asset::AssetType;
use crate::core::error::PutOutcome;
use crate::core::transport::{ApiCall, Endpoint};

pub async fn put_stack_instance_file(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    asset: AssetType,
) -> Result<PutOutcome> {
    let endpoint = match asset {
        AssetType::StackInstanceTemplate => Endpoint::UpdateStackSourceCode,
        AssetType::StackInstanceVariablesLess => Endpoint::UpdateStackLessVars,
        _ => Endpoint::UpdateStackLess,
    };
    if let Some(skip) = ctx.require(endpoint, rel) {
        return Ok(skip);
    }

    let Some(stack) = ctx.resolver().stack_instance(rel)?.found() else {
        return Ok(cannot_update(rel));
    };
    let call = ApiCall::new()
        .param(&stack.repository_id)
        .body(json!({ "source": ctx.read(rel)? }))
        .if_match(stack.etag.as_deref());
    ctx.send(rel, endpoint, call).await
}
