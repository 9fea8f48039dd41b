//! Widget, widget instance and base-content uploads.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::extension::{EXTENSION_ENDPOINTS, create_widget};
use super::{SyncContext, cannot_update, file_name, parent_name};
use crate::core::asset::AssetType;
use crate::core::classify::classify;
use crate::core::error::{PutOutcome, SyncError};
use crate::core::identity::{InstanceIdentity, WidgetIdentity};
use crate::core::layout::{
    INSTANCES_DIR, LESS_INSTANCE_TOKEN, LOCALES_DIR, SOURCE_USER, WIDGET_LESS, WIDGET_TEMPLATE,
};
use crate::core::model::{JsFileList, WidgetDetail};
use crate::core::sidecar::{
    MetadataKind, SidecarRecord, WidgetInstanceRecord, WidgetRecord, entity_dir,
};
use crate::core::transport::{ApiCall, Endpoint};
use crate::infra::walk::ContentWalker;

/// Put back the instance-specific selector that grab replaced with a token.
pub fn expand_less_token(source: &str, descriptor_id: &str, instance_id: &str) -> String {
    source.replace(LESS_INSTANCE_TOKEN, &format!("#{descriptor_id}-{instance_id}"))
}

/// `name` as translated for `locale` in a metadata JSON `translations` array.
pub fn translated_name(metadata: &Value, locale: &str) -> Option<String> {
    metadata
        .get("translations")?
        .as_array()?
        .iter()
        .find(|t| t.get("language").and_then(Value::as_str) == Some(locale))?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Resources out of a grabbed snippets file (`{"resources": {...}}` or a flat map).
pub(crate) fn snippet_resources(file: Value) -> Value {
    match file {
        Value::Object(mut map) => match map.remove("resources") {
            Some(resources) => resources,
            None => Value::Object(map),
        },
        other => other,
    }
}

fn patch(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn resolve_widget(ctx: &SyncContext<'_>, rel: &Path) -> Result<Option<WidgetIdentity>> {
    Ok(ctx.resolver().widget(rel)?.found())
}

/// Owning widget and instance, creating the instance when the destination
/// lacks it.
async fn widget_and_instance(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
) -> Result<Option<(WidgetIdentity, InstanceIdentity)>> {
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(None);
    };
    let Some(local) = ctx.sidecar.read_record::<WidgetInstanceRecord>(rel)? else {
        warn!(path = %rel.display(), "no local widget instance metadata");
        return Ok(None);
    };

    if !ctx.snapshot.has_instance(&local.display_name, local.version) {
        create_instance(ctx, rel, &widget, &local).await?;
    }

    Ok(ctx
        .resolver()
        .instance(rel)?
        .found()
        .map(|instance| (widget, instance)))
}

async fn create_instance(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    widget: &WidgetIdentity,
    local: &WidgetInstanceRecord,
) -> Result<()> {
    info!(instance = %local.display_name, widget = %widget.display_name, "creating widget instance");

    let body = json!({
        "widgetDescriptorId": widget.widget_type,
        "displayName": local.display_name,
    });
    let resp = ctx
        .transport
        .call(Endpoint::CreateWidgetInstance, ApiCall::new().body(body))
        .await?;
    if !resp.is_success() {
        bail!("creating widget instance \"{}\" failed: {}", local.display_name, resp.message());
    }

    ctx.snapshot
        .refresh_widget_instances(ctx.transport)
        .await?;
    let Some(remote) = ctx
        .snapshot
        .match_instance(&local.display_name, local.version)
        .cloned()
    else {
        return Err(SyncError::InstanceNotCreated(local.display_name.clone()).into());
    };

    // A new id means the tree now describes the new instance
    if !ctx.run.transfer_mode {
        ctx.sidecar.update::<WidgetInstanceRecord>(
            rel,
            patch(&[
                ("repositoryId", json!(remote.repository_id)),
                ("descriptorRepositoryId", json!(remote.descriptor.repository_id)),
            ]),
        )?;
        let dir = entity_dir(rel, MetadataKind::WidgetInstance);
        if let Some(dir) = &dir {
            ctx.sidecar.etags().reset_tree(dir)?;
        }
        if dir.as_deref() != Some(rel) {
            ctx.sidecar.etags().write_dummy(rel)?;
        }
    }
    Ok(())
}

/// Widget directory that does not exist on the destination: uploaded as an
/// extension. Only user-created widgets carry enough metadata for that.
pub async fn put_widget(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(record) = ctx.sidecar.read_record::<WidgetRecord>(rel)? else {
        warn!(path = %rel.display(), "no local widget metadata; cannot create the widget");
        return Ok(PutOutcome::Failed("no local widget metadata".into()));
    };

    if record.source != Some(SOURCE_USER) {
        warn!(
            widget = %record.display_name,
            "insufficient information to create this widget; only user-created widgets can be recreated"
        );
        return Ok(PutOutcome::Failed("only user-created widgets can be recreated".into()));
    }

    if let Some(missing) = EXTENSION_ENDPOINTS
        .into_iter()
        .find(|e| !ctx.transport.supports(*e))
    {
        warn!(widget = %record.display_name, %missing, "the destination cannot install extensions");
        return Ok(PutOutcome::Failed(format!("server lacks {missing}")));
    }

    create_widget(ctx, rel, &record).await
}

/// Instance directory. A missing instance is created by its first file;
/// until then its tracked etags are placeholders.
pub async fn put_widget_instance(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(local) = ctx.sidecar.read_record::<WidgetInstanceRecord>(rel)? else {
        warn!(path = %rel.display(), "no local widget instance metadata");
        return Ok(PutOutcome::skipped("no local widget instance metadata"));
    };

    if ctx.snapshot.has_instance(&local.display_name, local.version) {
        return Ok(PutOutcome::unchanged("instance already exists"));
    }

    // The source tree's tokens stay as grabbed when transferring
    if !ctx.run.transfer_mode {
        let reset = ctx.sidecar.etags().reset_tree(rel)?;
        info!(instance = %local.display_name, reset, "instance missing remotely; etags reset");
    }
    Ok(PutOutcome::unchanged("instance is created by its files"))
}

pub async fn put_instance_template(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some((_, instance)) = widget_and_instance(ctx, rel).await? else {
        return Ok(cannot_update(rel));
    };
    let source = ctx.read(rel)?;
    let call = ApiCall::new()
        .param(&instance.repository_id)
        .body(json!({ "source": source }))
        .if_match(instance.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateWidgetSourceCode, call).await
}

pub async fn put_instance_less(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some((_, instance)) = widget_and_instance(ctx, rel).await? else {
        return Ok(cannot_update(rel));
    };
    let source = expand_less_token(
        &ctx.read(rel)?,
        &instance.descriptor_repository_id,
        &instance.repository_id,
    );
    let call = ApiCall::new()
        .param(&instance.repository_id)
        .body(json!({ "source": source }))
        .if_match(instance.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateWidgetLess, call).await
}

/// Web content keeps the instance's name and notes alongside the content.
pub async fn put_web_content(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::UpdateWidgetWebContent, rel) {
        return Ok(skip);
    }
    let Some((_, instance)) = widget_and_instance(ctx, rel).await? else {
        return Ok(cannot_update(rel));
    };

    let detail: WidgetDetail = ctx
        .transport
        .call(Endpoint::GetWidget, ApiCall::new().param(&instance.repository_id))
        .await?
        .parse(Endpoint::GetWidget)?;

    let body = json!({
        "name": detail.name.unwrap_or_else(|| instance.display_name.clone()),
        "notes": detail.notes.unwrap_or_default(),
        "content": ctx.read(rel)?,
    });
    let call = ApiCall::new()
        .param(&instance.repository_id)
        .body(body)
        .if_match(instance.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateWidgetWebContent, call).await
}

pub async fn put_instance_snippets(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(locale) = parent_name(rel) else {
        return Ok(cannot_update(rel));
    };
    let Some((_, instance)) = widget_and_instance(ctx, rel).await? else {
        return Ok(cannot_update(rel));
    };

    let body = json!({ "custom": snippet_resources(ctx.read_json(rel)?) });
    let (endpoint, call) = if ctx
        .transport
        .supports(Endpoint::UpdateWidgetCustomTranslationsForLocale)
    {
        (
            Endpoint::UpdateWidgetCustomTranslationsForLocale,
            ApiCall::new()
                .param(&instance.repository_id)
                .param(&locale)
                .locale(&locale),
        )
    } else {
        (
            Endpoint::UpdateWidgetCustomTranslations,
            ApiCall::new()
                .param(&instance.repository_id)
                .locale(&locale),
        )
    };
    ctx.send(rel, endpoint, call.body(body).if_match(instance.etag.as_deref()))
        .await
}

pub async fn put_instance_metadata(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if !ctx.run.send_instance_config {
        debug!(path = %rel.display(), "instance config sending is off");
        return Ok(PutOutcome::unchanged("instance config sending is off"));
    }
    if let Some(skip) = ctx.require(Endpoint::UpdateWidgetMetadata, rel) {
        return Ok(skip);
    }
    let Some((_, instance)) = widget_and_instance(ctx, rel).await? else {
        return Ok(cannot_update(rel));
    };

    let metadata = ctx.read_json(rel)?;
    let call = ApiCall::new()
        .param(&instance.repository_id)
        .body(json!({ "metadata": metadata }))
        .if_match(instance.etag.as_deref());
    let outcome = ctx
        .send(rel, Endpoint::UpdateWidgetMetadata, call)
        .await?;

    if outcome.is_applied() && !ctx.run.transfer_mode {
        if let Some(name) = metadata.get("displayName").and_then(Value::as_str) {
            set_display_name::<WidgetInstanceRecord>(ctx, rel, name)?;
        }
    }
    Ok(outcome)
}

pub async fn put_widget_metadata(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::UpdateWidgetDescriptorMetadata, rel) {
        return Ok(skip);
    }
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };

    let metadata = ctx.read_json(rel)?;
    let call = ApiCall::new()
        .param(&widget.repository_id)
        .body(json!({ "metadata": metadata }))
        .if_match(widget.etag.as_deref());
    let outcome = ctx
        .send(rel, Endpoint::UpdateWidgetDescriptorMetadata, call)
        .await?;

    if outcome.is_applied() && !ctx.run.transfer_mode {
        if let Some(name) = translated_name(&metadata, ctx.transport.locale()) {
            set_display_name::<WidgetRecord>(ctx, rel, &name)?;
        }
    }
    Ok(outcome)
}

/// Keep the sidecar display name in step with a renamed entity.
fn set_display_name<R: SidecarRecord>(ctx: &SyncContext<'_>, rel: &Path, name: &str) -> Result<()> {
    debug!(path = %rel.display(), %name, "display name updated");
    ctx.sidecar
        .update::<R>(rel, patch(&[("displayName", json!(name))]))?;
    Ok(())
}

/// Base template, LESS or snippets, optionally pushed through to instances.
pub async fn put_widget_base_file(
    ctx: &mut SyncContext<'_>,
    rel: &Path,
    asset: AssetType,
) -> Result<PutOutcome> {
    let endpoint = match asset {
        AssetType::WidgetBaseTemplate => Endpoint::UpdateWidgetDescriptorBaseTemplate,
        AssetType::WidgetBaseLess => Endpoint::UpdateWidgetDescriptorBaseLess,
        _ => Endpoint::UpdateWidgetDescriptorBaseLocaleContent,
    };
    if let Some(skip) = ctx.require(endpoint, rel) {
        return Ok(skip);
    }
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };

    let call = ApiCall::new()
        .param(&widget.repository_id)
        .query(format!("?updateInstances={}", ctx.run.update_instances))
        .if_match(widget.etag.as_deref());
    let call = if asset == AssetType::WidgetBaseSnippets {
        let Some(locale) = parent_name(rel) else {
            return Ok(cannot_update(rel));
        };
        call.param(&locale)
            .locale(locale)
            .body(json!({ "localeData": ctx.read_json(rel)? }))
    } else {
        call.body(json!({ "source": ctx.read(rel)? }))
    };

    let outcome = ctx.send(rel, endpoint, call).await?;
    if outcome.is_applied() && ctx.run.update_instances {
        sync_instances_with_base(ctx, rel, asset)?;
    }
    Ok(outcome)
}

/// Instance file that mirrors base file `rel`, relative to an instance dir.
fn instance_counterpart(rel: &Path, asset: AssetType) -> Option<PathBuf> {
    match asset {
        AssetType::WidgetBaseTemplate => Some(PathBuf::from(WIDGET_TEMPLATE)),
        AssetType::WidgetBaseLess => Some(PathBuf::from(WIDGET_LESS)),
        AssetType::WidgetBaseSnippets => {
            Some(Path::new(LOCALES_DIR).join(parent_name(rel)?).join(file_name(rel)))
        }
        _ => None,
    }
}

/// Base LESS as an instance stylesheet: wrapped in the instance selector.
pub fn scope_base_less(base: &str) -> String {
    format!("{LESS_INSTANCE_TOKEN} {{\n{base}\n}}\n")
}

/// Make local instance copies match the base file the server just pushed
/// into every instance.
fn sync_instances_with_base(ctx: &SyncContext<'_>, rel: &Path, asset: AssetType) -> Result<()> {
    let (Some(widget_dir), Some(counterpart)) =
        (entity_dir(rel, MetadataKind::Widget), instance_counterpart(rel, asset))
    else {
        return Ok(());
    };
    let instances_dir = widget_dir.join(INSTANCES_DIR);
    if !ctx.root().is_dir(&instances_dir) {
        return Ok(());
    }

    let base = ctx.read(rel)?;
    let contents = if asset == AssetType::WidgetBaseLess { scope_base_less(&base) } else { base };

    let instance_dirs: Vec<PathBuf> = ContentWalker::new()
        .walk(ctx.root().absolute(&instances_dir))
        .into_iter()
        .filter(|e| e.is_dir)
        .filter_map(|e| ctx.root().relative(&e.path).ok())
        .filter(|dir| classify(dir, true) == Some(AssetType::WidgetInstance))
        .collect();

    for dir in instance_dirs {
        let target = dir.join(&counterpart);
        if !ctx.root().exists(&target) {
            continue;
        }
        ctx.root().write(&target, &contents)?;
        if !ctx.run.transfer_mode {
            ctx.sidecar.etags().write_dummy(&target)?;
        }
        debug!(path = %target.display(), "instance synced with base");
    }
    Ok(())
}

pub async fn put_config_metadata(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::UpdateConfigMetadataForWidgetDescriptor, rel) {
        return Ok(skip);
    }
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };
    let call = ApiCall::new()
        .param(&widget.repository_id)
        .body(json!({ "metadata": ctx.read_json(rel)? }))
        .if_match(widget.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateConfigMetadataForWidgetDescriptor, call)
        .await
}

/// `config/locales/<locale>.json`
pub async fn put_config_snippets(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    if let Some(skip) = ctx.require(Endpoint::UpdateConfigLocaleContentForWidgetDescriptor, rel) {
        return Ok(skip);
    }
    let Some(locale) = rel
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
    else {
        return Ok(cannot_update(rel));
    };
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };
    let call = ApiCall::new()
        .param(&widget.repository_id)
        .param(&locale)
        .locale(locale)
        .body(json!({ "localeData": ctx.read_json(rel)? }))
        .if_match(widget.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateConfigLocaleContentForWidgetDescriptor, call)
        .await
}

pub async fn put_widget_javascript(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };
    let call = ApiCall::new()
        .param(&widget.repository_id)
        .param(file_name(rel))
        .body(json!({ "source": ctx.read(rel)? }))
        .if_match(widget.etag.as_deref());
    ctx.send(rel, Endpoint::UpdateWidgetDescriptorJavascript, call)
        .await
}

/// Module JS is updated when the widget already has it and created
/// otherwise.
pub async fn put_module_javascript(ctx: &mut SyncContext<'_>, rel: &Path) -> Result<PutOutcome> {
    let Some(widget) = resolve_widget(ctx, rel)? else {
        return Ok(cannot_update(rel));
    };
    let name = file_name(rel);
    let endpoint = if module_exists(ctx, &widget, rel, &name).await? {
        Endpoint::UpdateWidgetDescriptorJavascriptExtension
    } else {
        Endpoint::CreateWidgetDescriptorJavascriptExtension
    };
    if let Some(skip) = ctx.require(endpoint, rel) {
        return Ok(skip);
    }
    let call = ApiCall::new()
        .param(&widget.repository_id)
        .param(&name)
        .body(json!({ "source": ctx.read(rel)? }))
        .if_match(widget.etag.as_deref());
    ctx.send(rel, endpoint, call).await
}

/// A tracked etag means the file came from this node. When transferring,
/// the destination's own module listing decides.
async fn module_exists(
    ctx: &SyncContext<'_>,
    widget: &WidgetIdentity,
    rel: &Path,
    name: &str,
) -> Result<bool> {
    if !ctx.run.transfer_mode {
        return Ok(ctx.sidecar.etags().read(rel)?.is_some());
    }
    let listing = Endpoint::GetWidgetDescriptorJavascriptExtensionInfoById;
    if !ctx.transport.supports(listing) {
        return Ok(false);
    }
    let resp = ctx
        .transport
        .call(listing, ApiCall::new().param(&widget.repository_id))
        .await?;
    if !resp.is_success() {
        return Ok(false);
    }
    let list: JsFileList = resp.parse(listing)?;
    Ok(list
        .js_files
        .iter()
        .any(|f| f.name == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn less_token_expands_to_destination_ids() {
        let src = "#WIDGET_ID-WIDGET_INSTANCE_ID .title { color: red; }";
        assert_eq!(
            expand_less_token(src, "cartSummary_v2", "cs100001"),
            "#cartSummary_v2-cs100001 .title { color: red; }"
        );
    }

    #[test]
    fn display_name_from_translations() {
        let metadata = json!({
            "translations": [
                {"language": "de", "name": "Warenkorb"},
                {"language": "en", "name": "Cart"}
            ]
        });
        assert_eq!(translated_name(&metadata, "en").as_deref(), Some("Cart"));
        assert_eq!(translated_name(&metadata, "fr"), None);
        assert_eq!(translated_name(&json!({}), "en"), None);
    }

    #[test]
    fn snippets_file_shapes() {
        assert_eq!(
            snippet_resources(json!({"resources": {"a": "1"}})),
            json!({"a": "1"})
        );
        assert_eq!(snippet_resources(json!({"b": "2"})), json!({"b": "2"}));
    }
}
