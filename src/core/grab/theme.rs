//! Custom themes.

use std::path::Path;

use anyhow::Result;
use futures::{StreamExt, stream};
use tracing::info;

use super::{GrabContext, Tally};
use crate::core::layout::*;
use crate::core::model::Theme;
use crate::core::sidecar::ThemeRecord;
use crate::core::transport::{ApiCall, Endpoint, fetch_items};

pub async fn grab_themes(ctx: &GrabContext<'_>) -> Result<Tally> {
    ctx.root().make_tracked_dir(Path::new(THEMES_DIR))?;
    let themes = fetch_items::<Theme>(
        ctx.transport,
        Endpoint::GetThemes,
        ApiCall::new().query("?type=custom"),
    )
    .await?;

    Ok(stream::iter(&themes)
        .map(|theme| async move { Tally::entity(&theme.name, grab_theme(ctx, theme).await) })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum())
}

/// All three source files share the one etag the server sends.
async fn grab_theme(ctx: &GrabContext<'_>, theme: &Theme) -> Result<Tally> {
    info!(theme = %theme.name, "grabbing theme");
    let dir = Path::new(THEMES_DIR).join(sanitize_name(&theme.name));
    ctx.root().make_tracked_dir(&dir)?;

    let resp = ctx
        .fetch(Endpoint::GetThemeSource, ApiCall::new().param(&theme.repository_id))
        .await?;
    let etag = resp.etag.as_deref();
    for (field, file) in [
        ("variables", THEME_VARIABLES),
        ("styles", THEME_STYLES),
        ("additionalStyles", THEME_ADDITIONAL_STYLES),
    ] {
        let contents = resp.field(field).unwrap_or_default();
        ctx.write_with_etag(&dir.join(file), contents, etag)?;
    }

    ctx.sidecar.write(
        &dir,
        &ThemeRecord {
            repository_id: theme.repository_id.clone(),
            display_name: theme.name.clone(),
            ..Default::default()
        },
    )?;
    Ok(Tally { written: 3, ..Tally::default() })
}
