//! Widgets (both source tiers), their base content and their instances.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use futures::{StreamExt, stream};
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{GrabContext, Tally, fields};
use crate::core::layout::*;
use crate::core::model::{JsFileList, LocaleResources, WidgetDescriptor, WidgetInstance, WidgetWithInstances};
use crate::core::sidecar::{WidgetInstanceRecord, WidgetRecord};
use crate::core::transport::{ApiCall, Endpoint, fetch_items};

/// Replace the instance-specific selector with the stable token.
pub fn insert_less_token(source: &str, descriptor_id: &str, instance_id: &str) -> String {
    source.replace(&format!("#{descriptor_id}-{instance_id}"), LESS_INSTANCE_TOKEN)
}

/// One instance per display name: the one with the highest version.
/// Ties keep the first listed.
pub fn latest_by_name(instances: Vec<WidgetInstance>) -> Vec<WidgetInstance> {
    let mut latest: IndexMap<String, WidgetInstance> = IndexMap::new();
    for instance in instances {
        match latest.entry(instance.display_name.clone()) {
            Entry::Occupied(mut slot) => {
                if instance.effective_version() > slot.get().effective_version() {
                    slot.insert(instance);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(instance);
            }
        }
    }
    latest.into_values().collect()
}

/// Where each widget type was written, for instances and elements.
#[derive(Debug, Default, Clone)]
pub struct WidgetDirs(IndexMap<String, PathBuf>);

impl WidgetDirs {
    pub fn insert(&mut self, widget_type: impl Into<String>, dir: PathBuf) {
        self.0.insert(widget_type.into(), dir);
    }

    /// Directory for `widget_type` at `version`; old versions nest under
    /// `version/<v>`. `None` for widgets that were not grabbed.
    pub fn for_version(&self, widget_type: &str, version: i64, latest: bool) -> Option<PathBuf> {
        let base = self.0.get(widget_type)?;
        Some(if latest {
            base.clone()
        } else {
            base.join(VERSION_DIR).join(version.to_string())
        })
    }
}

fn widget_dir(widget: &WidgetDescriptor) -> PathBuf {
    Path::new(WIDGETS_DIR).join(sanitize_name(&widget.display_name))
}

/// Snippet file name for a widget type: `ns.<type>.json`.
fn snippets_file(widget_type: &str) -> String {
    format!("ns.{}.json", widget_type.to_lowercase())
}

pub async fn grab_widgets(ctx: &GrabContext<'_>) -> Result<(Tally, WidgetDirs)> {
    ctx.root().make_tracked_dir(Path::new(WIDGETS_DIR))?;

    let listing = |source: i64| {
        fetch_items::<WidgetWithInstances>(
            ctx.transport,
            Endpoint::GetAllWidgetInstances,
            ApiCall::new().query(format!("?source={source}")),
        )
    };
    let (built_in, user) = futures::try_join!(listing(SOURCE_BUILT_IN), listing(SOURCE_USER))?;

    let widgets: Vec<WidgetDescriptor> = built_in
        .into_iter()
        .chain(user)
        .map(|w| w.descriptor)
        .filter(|d| d.editable_widget)
        .collect();

    let mut dirs = WidgetDirs::default();
    for widget in &widgets {
        dirs.insert(&widget.widget_type, widget_dir(widget));
    }

    let tally = stream::iter(&widgets)
        .map(|widget| async move {
            Tally::entity(&widget.display_name, grab_widget(ctx, widget).await)
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum();
    Ok((tally, dirs))
}

async fn grab_widget(ctx: &GrabContext<'_>, widget: &WidgetDescriptor) -> Result<Tally> {
    let dir = widget_dir(widget);
    info!(widget = %widget.display_name, "grabbing widget");
    ctx.root().make_tracked_dir(&dir)?;
    ctx.root().make_tracked_dir(&dir.join(INSTANCES_DIR))?;

    let mut tally = Tally::default();
    if widget.js_editable {
        tally.absorb("widget JavaScript", grab_javascript(ctx, widget, &dir, false).await);
    } else if widget.javascript_extension.is_some() {
        tally.absorb("widget module JavaScript", grab_javascript(ctx, widget, &dir, true).await);
    }

    if widget.source == SOURCE_USER {
        tally += grab_base_content(ctx, widget, &dir).await;
        if widget.configurable {
            tally += grab_config(ctx, widget, &dir).await;
        }
        if ctx.transport.supports(Endpoint::GetWidgetDescriptorMetadata) {
            let step = ctx
                .copy_json(
                    Endpoint::GetWidgetDescriptorMetadata,
                    ApiCall::new().param(&widget.repository_id),
                    "metadata",
                    &dir.join(WIDGET_METADATA_JSON),
                )
                .await;
            tally.absorb("widget metadata", step);
        } else {
            warn!(widget = %widget.display_name, "server cannot serve widget metadata");
        }
    }

    // Written last: a record on disk means the widget was grabbed
    write_widget_record(ctx, widget, &dir)?;
    Ok(tally)
}

fn write_widget_record(ctx: &GrabContext<'_>, widget: &WidgetDescriptor, dir: &Path) -> Result<WidgetRecord> {
    let mut patch = fields(json!({
        "repositoryId": widget.repository_id,
        "widgetType": widget.widget_type,
        "version": widget.version,
        "displayName": widget.display_name,
    }));
    if widget.source == SOURCE_USER {
        patch.insert("source".into(), json!(widget.source));
        patch.insert("global".into(), json!(widget.global));
        if let Some(resources) = &widget.i18nresources {
            patch.insert("i18nresources".into(), json!(resources));
        }
        if let Some(script) = widget.main_script() {
            patch.insert("javascript".into(), json!(script));
        }
    }
    ctx.sidecar.update::<WidgetRecord>(dir, patch)
}

/// Widget JavaScript: module files go to `module/js`, the rest to `js`.
async fn grab_javascript(
    ctx: &GrabContext<'_>,
    widget: &WidgetDescriptor,
    dir: &Path,
    modules_only: bool,
) -> Result<usize> {
    let endpoint = if modules_only {
        Endpoint::GetWidgetDescriptorJavascriptExtensionInfoById
    } else {
        Endpoint::GetWidgetDescriptorJavascriptInfoById
    };
    let list: JsFileList = ctx
        .fetch(endpoint, ApiCall::new().param(&widget.repository_id))
        .await?
        .parse(endpoint)?;

    let mut written = 0;
    for file in list.js_files {
        let module = file.is_module();
        if modules_only && !module {
            continue;
        }
        if !is_safe_file_name(&file.name) {
            bail!("refusing widget JavaScript name {:?}", file.name);
        }
        let resp = ctx.transport.fetch_url(&file.url).await?;
        if !resp.is_success() {
            warn!(file = %file.name, status = resp.status, "could not download widget JavaScript");
            continue;
        }
        let target = if module {
            dir.join(MODULE_DIR).join(JS_DIR)
        } else {
            dir.join(JS_DIR)
        };
        let source = resp.data.as_str().unwrap_or_default();
        ctx.write_with_etag(&target.join(&file.name), source, resp.etag.as_deref())?;
        written += 1;
    }
    Ok(written)
}

/// Base template, LESS and snippets of a user widget.
async fn grab_base_content(ctx: &GrabContext<'_>, widget: &WidgetDescriptor, dir: &Path) -> Tally {
    let mut tally = Tally::default();
    let supported = [
        Endpoint::GetWidgetDescriptorBaseTemplate,
        Endpoint::GetWidgetDescriptorBaseLess,
        Endpoint::GetWidgetDescriptorBaseLocaleContent,
    ]
    .into_iter()
    .all(|e| ctx.transport.supports(e));
    if !supported {
        warn!(widget = %widget.display_name, "server cannot serve base widget content");
        return tally;
    }

    // Global widgets have no markup or styling of their own
    if !widget.global {
        for (endpoint, file) in [
            (Endpoint::GetWidgetDescriptorBaseTemplate, WIDGET_TEMPLATE),
            (Endpoint::GetWidgetDescriptorBaseLess, WIDGET_LESS),
        ] {
            let call = ApiCall::new().param(&widget.repository_id);
            let step = ctx
                .copy_field(endpoint, call, "source", &dir.join(file), str::to_string)
                .await;
            tally.absorb(file, step);
        }
    }

    if widget.i18nresources.as_deref().is_some_and(|r| !r.is_empty()) {
        for locale in ctx.locales() {
            let rel = dir
                .join(LOCALES_DIR)
                .join(&locale)
                .join(snippets_file(&widget.widget_type));
            let call = ApiCall::new()
                .param(&widget.repository_id)
                .param(&locale)
                .locale(&locale);
            let step = ctx
                .copy_json(Endpoint::GetWidgetDescriptorBaseLocaleContent, call, "localeData", &rel)
                .await;
            tally.absorb("base snippets", step);
        }
    }
    tally
}

/// Config metadata and per-locale config snippets of a configurable widget.
async fn grab_config(ctx: &GrabContext<'_>, widget: &WidgetDescriptor, dir: &Path) -> Tally {
    let mut tally = Tally::default();
    if !ctx.transport.supports(Endpoint::GetConfigMetadataForWidgetDescriptor) {
        warn!(widget = %widget.display_name, "server cannot serve widget config");
        return tally;
    }

    let config_dir = dir.join(CONFIG_DIR);
    let step = ctx
        .copy_json(
            Endpoint::GetConfigMetadataForWidgetDescriptor,
            ApiCall::new().param(&widget.repository_id),
            "metadata",
            &config_dir.join(CONFIG_METADATA_JSON),
        )
        .await;
    tally.absorb("config metadata", step);

    for locale in ctx.locales() {
        let call = ApiCall::new()
            .param(&widget.repository_id)
            .param(&locale)
            .locale(&locale);
        let rel = config_dir
            .join(LOCALES_DIR)
            .join(format!("{locale}.json"));
        let step = ctx
            .copy_json(Endpoint::GetConfigLocaleContentForWidgetDescriptor, call, "localeData", &rel)
            .await;
        tally.absorb("config snippets", step);
    }
    tally
}

pub async fn grab_instances(ctx: &GrabContext<'_>, dirs: &WidgetDirs) -> Result<Tally> {
    let listed =
        fetch_items::<WidgetInstance>(ctx.transport, Endpoint::ListWidgets, ApiCall::new()).await?;
    let instances = latest_by_name(listed);

    Ok(stream::iter(&instances)
        .map(|instance| async move {
            Tally::entity(&instance.display_name, grab_instance(ctx, dirs, instance).await)
        })
        .buffer_unordered(ctx.run.concurrency)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .sum())
}

async fn grab_instance(
    ctx: &GrabContext<'_>,
    dirs: &WidgetDirs,
    instance: &WidgetInstance,
) -> Result<Tally> {
    let descriptor = &instance.descriptor;
    let latest = descriptor.is_latest();
    let Some(widget_dir) = dirs.for_version(&descriptor.widget_type, descriptor.version, latest)
    else {
        debug!(instance = %instance.display_name, "widget not grabbed; skipping instance");
        return Ok(Tally::default());
    };

    let dir = widget_dir
        .join(INSTANCES_DIR)
        .join(sanitize_name(&instance.display_name));

    // An instance grabbed from a newer widget version is left alone
    if let Some(on_disk) = ctx.sidecar.read_record::<WidgetInstanceRecord>(&dir)? {
        if on_disk.version > descriptor.version {
            debug!(
                instance = %instance.display_name,
                on_disk = on_disk.version,
                fetched = descriptor.version,
                "instance on disk is newer"
            );
            return Ok(Tally::skipped());
        }
    }

    info!(instance = %instance.display_name, "grabbing widget instance");
    if !latest && ctx.sidecar.read_record::<WidgetRecord>(&widget_dir)?.is_none() {
        ctx.root().make_tracked_dir(&widget_dir)?;
        write_widget_record(ctx, descriptor, &widget_dir)?;
    }

    ctx.root().make_tracked_dir(&dir)?;
    ctx.sidecar.write(
        &dir,
        &WidgetInstanceRecord {
            repository_id: instance.repository_id.clone(),
            descriptor_repository_id: descriptor.repository_id.clone(),
            version: descriptor.version,
            display_name: instance.display_name.clone(),
            ..Default::default()
        },
    )?;

    let id = || ApiCall::new().param(&instance.repository_id);
    let mut tally = Tally::default();

    let step = ctx
        .copy_field(Endpoint::GetWidgetSourceCode, id(), "source", &dir.join(WIDGET_TEMPLATE), str::to_string)
        .await;
    tally.absorb(WIDGET_TEMPLATE, step);

    if descriptor.widget_type == WEB_CONTENT_WIDGET_TYPE {
        let step = ctx
            .copy_field(
                Endpoint::GetWidgetWebContent,
                id(),
                "content",
                &dir.join(WEB_CONTENT_TEMPLATE),
                str::to_string,
            )
            .await;
        tally.absorb(WEB_CONTENT_TEMPLATE, step);
    }

    let step = ctx
        .copy_field(Endpoint::GetWidgetLess, id(), "source", &dir.join(WIDGET_LESS), |less| {
            insert_less_token(less, &descriptor.repository_id, &instance.repository_id)
        })
        .await;
    tally.absorb(WIDGET_LESS, step);

    for locale in ctx.locales() {
        let step = grab_instance_snippets(ctx, instance, &dir, &locale).await;
        tally.absorb("instance snippets", step);
    }

    if ctx.transport.supports(Endpoint::GetWidgetMetadata) {
        let step = ctx
            .copy_json(Endpoint::GetWidgetMetadata, id(), "metadata", &dir.join(WIDGET_INSTANCE_METADATA_JSON))
            .await;
        tally.absorb("instance metadata", step);
    } else {
        warn!(instance = %instance.display_name, "server cannot serve widget instance metadata");
    }
    Ok(tally)
}

/// Instance text for one locale, custom values laid over the defaults.
async fn grab_instance_snippets(
    ctx: &GrabContext<'_>,
    instance: &WidgetInstance,
    dir: &Path,
    locale: &str,
) -> Result<usize> {
    let (endpoint, call) = if ctx
        .transport
        .supports(Endpoint::GetWidgetLocaleContentForLocale)
    {
        (
            Endpoint::GetWidgetLocaleContentForLocale,
            ApiCall::new()
                .param(&instance.repository_id)
                .param(locale),
        )
    } else {
        (
            Endpoint::GetWidgetLocaleContent,
            ApiCall::new().param(&instance.repository_id),
        )
    };
    let resp = ctx.fetch(endpoint, call.locale(locale)).await?;

    let Some(locale_data) = resp.data.get("localeData").cloned() else {
        return Ok(0);
    };
    let resources: LocaleResources = serde_json::from_value(locale_data)?;
    if resources.resources.is_empty() {
        return Ok(0);
    }

    let rel = dir
        .join(LOCALES_DIR)
        .join(locale)
        .join(snippets_file(&instance.descriptor.widget_type));
    let text = serde_json::to_string_pretty(&json!({ "resources": resources.effective() }))?;
    ctx.write_with_etag(&rel, &text, resp.etag.as_deref())?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, version: i64, repo: &str) -> WidgetInstance {
        WidgetInstance {
            repository_id: repo.into(),
            display_name: name.into(),
            version: Some(version),
            ..Default::default()
        }
    }

    #[test]
    fn dedupe_keeps_highest_version() {
        let kept = latest_by_name(vec![
            instance("Cart", 1, "old"),
            instance("Header", 3, "h"),
            instance("Cart", 2, "new"),
            instance("Cart", 2, "later-tie"),
        ]);
        let ids: Vec<_> = kept.iter().map(|i| i.repository_id.as_str()).collect();
        assert_eq!(ids, ["new", "h"]);
    }

    #[test]
    fn less_token_replaces_selector() {
        let less = "#cartSummary_v2-wi100 .total { color: red; }\n#other-x {}";
        assert_eq!(
            insert_less_token(less, "cartSummary_v2", "wi100"),
            "#WIDGET_ID-WIDGET_INSTANCE_ID .total { color: red; }\n#other-x {}"
        );
    }

    #[test]
    fn old_versions_nest_under_version_dir() {
        let mut dirs = WidgetDirs::default();
        dirs.insert("cartSummary", PathBuf::from("widget/Cart Summary"));
        assert_eq!(
            dirs.for_version("cartSummary", 3, true),
            Some(PathBuf::from("widget/Cart Summary"))
        );
        assert_eq!(
            dirs.for_version("cartSummary", 2, false),
            Some(PathBuf::from("widget/Cart Summary/version/2"))
        );
        assert_eq!(dirs.for_version("unknown", 1, true), None);
    }
}
