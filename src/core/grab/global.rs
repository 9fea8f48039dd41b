//! Storefront-wide content: common text snippets and application JavaScript.

use std::path::Path;

use anyhow::Result;
use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{GrabContext, Tally};
use crate::core::layout::*;
use crate::core::model::ApplicationJs;
use crate::core::transport::{ApiCall, Endpoint, fetch_items};

/// Lay `custom` values over the sectioned `resources` map.
pub(crate) fn apply_custom(resources: &mut Map<String, Value>, custom: &Map<String, Value>) {
    for section in resources.values_mut() {
        let Value::Object(entries) = section else {
            continue;
        };
        for (key, value) in entries.iter_mut() {
            match custom.get(key) {
                Some(over) if !over.is_null() && over.as_str() != Some("") => *value = over.clone(),
                _ => {}
            }
        }
    }
}

pub async fn grab_snippets(ctx: &GrabContext<'_>) -> Result<Tally> {
    if !ctx.transport.supports(Endpoint::GetResourceStrings) {
        warn!("server cannot serve text snippets");
        return Ok(Tally::default());
    }
    ctx.root().make_tracked_dir(Path::new(SNIPPETS_DIR))?;

    let locales = ctx.locales();
    Ok(stream::iter(&locales)
        .map(|locale| async move {
            let mut tally = Tally::default();
            tally.absorb(locale, grab_snippets_for(ctx, locale).await);
            tally
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum())
}

async fn grab_snippets_for(ctx: &GrabContext<'_>, locale: &str) -> Result<usize> {
    let (endpoint, call) = if ctx.transport.supports(Endpoint::GetResourceStringsForLocale) {
        (
            Endpoint::GetResourceStringsForLocale,
            ApiCall::new()
                .param(COMMON_NAMESPACE)
                .param(locale),
        )
    } else {
        (Endpoint::GetResourceStrings, ApiCall::new().param(COMMON_NAMESPACE))
    };
    let resp = ctx.fetch(endpoint, call.locale(locale)).await?;

    let Some(Value::Object(mut resources)) = resp.data.get("resources").cloned() else {
        return Ok(0);
    };
    if let Some(Value::Object(custom)) = resp.data.get("custom") {
        apply_custom(&mut resources, custom);
    }

    info!(locale, "grabbing text snippets");
    let rel = Path::new(SNIPPETS_DIR).join(locale).join(SNIPPETS_JSON);
    let text = serde_json::to_string_pretty(&resources)?;
    ctx.write_with_etag(&rel, &text, resp.etag.as_deref())?;
    Ok(1)
}

pub async fn grab_application_javascript(ctx: &GrabContext<'_>) -> Result<Tally> {
    if !ctx.transport.supports(Endpoint::GetAllApplicationJavaScript) {
        warn!("server cannot serve application JavaScript");
        return Ok(Tally::default());
    }
    let files = fetch_items::<ApplicationJs>(
        ctx.transport,
        Endpoint::GetAllApplicationJavaScript,
        ApiCall::new(),
    )
    .await?;
    ctx.root().make_tracked_dir(Path::new(GLOBAL_DIR))?;

    let mut tally = Tally::default();
    for file in files.iter().filter(|f| !f.name.is_empty()) {
        if !is_safe_file_name(&file.name) {
            warn!(file = %file.name, "refusing application JavaScript name outside global/");
            tally.failed += 1;
            continue;
        }
        info!(file = %file.name, "grabbing application JavaScript");
        let rel = Path::new(GLOBAL_DIR).join(&file.name);
        let step = ctx
            .copy_field(
                Endpoint::GetApplicationJavaScript,
                ApiCall::new().param(&file.name),
                "source",
                &rel,
                str::to_string,
            )
            .await;
        tally.absorb(&file.name, step);
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn custom_values_override_inner_keys() {
        let Value::Object(mut resources) = json!({
            "header": { "welcome": "Hello", "logout": "Log out" },
            "footer": { "copyright": "(c)" }
        }) else {
            panic!("object literal");
        };
        let Value::Object(custom) = json!({ "welcome": "Hi there", "logout": "" }) else {
            panic!("object literal");
        };

        apply_custom(&mut resources, &custom);
        assert_eq!(resources["header"]["welcome"], "Hi there");
        assert_eq!(resources["header"]["logout"], "Log out");
        assert_eq!(resources["footer"]["copyright"], "(c)");
    }
}
