//! Theme uploads: single source files, or a whole theme the destination lacks.

use std::path::Path;

use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use super::{SyncContext, cannot_update, file_name};
use crate::core::asset::AssetType;
use crate::core::error::PutOutcome;
use crate::core::layout::{THEME_ADDITIONAL_STYLES, THEME_STYLES, THEME_VARIABLES};
use crate::core::model::Theme;
use crate::core::sidecar::ThemeRecord;
use crate::core::transport::{ApiCall, Endpoint};

/// Request body field for each theme source file.
fn source_field(asset: AssetType) -> &'static str {
    match asset {
        AssetType::ThemeVariables => "variables",
        AssetType::ThemeAdditionalStyles => "additionalStyles",
        _ => "styles",
    }
}

pub async fn put_theme_file(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    asset: AssetType,
) -> Result<PutOutcome> {
    let Some(theme) = ctx.resolver().theme(rel)?.found() else {
        return Ok(cannot_update(rel));
    };
    let call = ApiCall::new()
        .param(&theme.repository_id)
        .body(json!({ source_field(asset): ctx.read(rel)? }))
        .if_match(theme.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateThemeSource, call).await
}

/// Create the theme from its three source files.
pub async fn put_theme(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::CreateTheme, rel) {
        return Ok(skip);
    }

    let name = match ctx.sidecar.read_record::<ThemeRecord>(rel)? {
        Some(record) if !record.display_name.is_empty() => record.display_name,
        _ => file_name(rel),
    };
    if ctx.snapshot.has_theme(&name) {
        return Ok(PutOutcome::skipped("theme already exists"));
    }

    let read = |file: &str| -> Result<String> {
        Ok(ctx
            .root()
            .read_opt(&rel.join(file))?
            .unwrap_or_default())
    };
    let body = json!({
        "name": name,
        "variables": read(THEME_VARIABLES)?,
        "styles": read(THEME_STYLES)?,
        "additionalStyles": read(THEME_ADDITIONAL_STYLES)?,
    });

    info!(theme = %name, "creating theme");
    let resp = ctx
        .transport
        .call(Endpoint::CreateTheme, ApiCall::new().body(body))
        .await?;
    if resp.status == 412 || !resp.is_success() {
        return ctx.settle(rel, &resp);
    }

    let Some(repository_id) = resp.field("repositoryId").map(str::to_string) else {
        warn!(theme = %name, "theme created but the server returned no id");
        return Ok(PutOutcome::Applied);
    };
    ctx.snapshot.insert_theme(Theme { repository_id: repository_id.clone(), name: name.clone() });

    if !ctx.run.transfer_mode {
        ctx.sidecar.write(
            rel,
            &ThemeRecord { repository_id, display_name: name, ..Default::default() },
        )?;
        for file in [THEME_VARIABLES, THEME_STYLES, THEME_ADDITIONAL_STYLES] {
            ctx.sidecar
                .etags()
                .record(&rel.join(file), resp.etag.as_deref())?;
        }
    }
    Ok(PutOutcome::Applied)
}
