//! Sidecar metadata records in the tracking tree.
//!
//! Every tracked entity (widget, widget instance, element, stack, stack
//! instance, theme) has one JSON record under `.ccc/`, next to the mirrored
//! location of the entity's directory. A record is found from *any* path
//! inside the entity by walking up to the nearest `<marker>/<name>` pair,
//! e.g. `instances/<name>` for instance-scoped files.
//!
//! Records keep keys they do not know about, so hand edits and server-side
//! additions survive a rewrite.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::etag::EtagStore;
use crate::core::layout::*;
use crate::infra::io::{ContentRoot, tracked};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    Config,
    Widget,
    WidgetInstance,
    Element,
    Stack,
    StackInstance,
    Theme,
}

impl MetadataKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config.json",
            Self::Widget => "widget.json",
            Self::WidgetInstance => "widgetInstance.json",
            Self::Element => "element.json",
            Self::Stack => "stack.json",
            Self::StackInstance => "stackInstance.json",
            Self::Theme => "theme.json",
        }
    }
}

/// Root-relative directory of the entity owning `rel`, or `None` if `rel`
/// is not inside such an entity.
pub fn entity_dir(rel: &Path, kind: MetadataKind) -> Option<PathBuf> {
    let segs: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let take = |n: usize| Some(segs[..n].iter().collect::<PathBuf>());

    match kind {
        MetadataKind::Config => Some(PathBuf::new()),
        MetadataKind::Widget => match segs.as_slice() {
            [WIDGETS_DIR, _, VERSION_DIR, _, ..] => take(4),
            [WIDGETS_DIR, _, ..] => take(2),
            _ => None,
        },
        MetadataKind::Stack => match segs.as_slice() {
            [STACKS_DIR, _, ..] => take(2),
            _ => None,
        },
        MetadataKind::Theme => match segs.as_slice() {
            [THEMES_DIR, _, ..] => take(2),
            _ => None,
        },
        MetadataKind::WidgetInstance | MetadataKind::StackInstance => {
            nearest_pair(&segs, INSTANCES_DIR).and_then(take)
        }
        MetadataKind::Element => nearest_pair(&segs, ELEMENTS_DIR).and_then(take),
    }
}

/// Length of the prefix ending at the last `<marker>/<name>` pair
fn nearest_pair(segs: &[&str], marker: &str) -> Option<usize> {
    segs.iter()
        .enumerate()
        .rev()
        .find(|(i, s)| **s == marker && i + 1 < segs.len())
        .map(|(i, _)| i + 2)
}

/// Root-relative path of the sidecar file for `rel`.
pub fn sidecar_path(rel: &Path, kind: MetadataKind) -> Option<PathBuf> {
    entity_dir(rel, kind).map(|dir| tracked(&dir).join(kind.file_name()))
}

/// A typed sidecar record.
pub trait SidecarRecord: Serialize + DeserializeOwned {
    const KIND: MetadataKind;
}

/// A record together with the etag of the content path it was read for.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<R> {
    pub record: R,
    pub etag: Option<String>,
}

/// Top-level record: which installation this tree belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigRecord {
    pub node: String,
    #[serde(alias = "commerceCloudVersion", skip_serializing_if = "Option::is_none")]
    pub repository_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grabbed_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetRecord {
    pub repository_id: String,
    pub widget_type: String,
    pub version: i64,
    pub display_name: String,
    /// 100 = built in, 101 = user created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub i18nresources: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub javascript: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetInstanceRecord {
    pub repository_id: String,
    pub descriptor_repository_id: String,
    /// Version of the owning descriptor
    pub version: i64,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementRecord {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackRecord {
    pub repository_id: String,
    pub stack_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackInstanceRecord {
    pub repository_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThemeRecord {
    pub repository_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SidecarRecord for ConfigRecord {
    const KIND: MetadataKind = MetadataKind::Config;
}
impl SidecarRecord for WidgetRecord {
    const KIND: MetadataKind = MetadataKind::Widget;
}
impl SidecarRecord for WidgetInstanceRecord {
    const KIND: MetadataKind = MetadataKind::WidgetInstance;
}
impl SidecarRecord for ElementRecord {
    const KIND: MetadataKind = MetadataKind::Element;
}
impl SidecarRecord for StackRecord {
    const KIND: MetadataKind = MetadataKind::Stack;
}
impl SidecarRecord for StackInstanceRecord {
    const KIND: MetadataKind = MetadataKind::StackInstance;
}
impl SidecarRecord for ThemeRecord {
    const KIND: MetadataKind = MetadataKind::Theme;
}

#[derive(Debug, Clone)]
pub struct SidecarStore {
    root: ContentRoot,
    etags: EtagStore,
}

impl SidecarStore {
    pub fn new(root: ContentRoot) -> Self {
        let etags = EtagStore::new(root.clone());
        Self { root, etags }
    }

    pub fn root(&self) -> &ContentRoot {
        &self.root
    }

    pub fn etags(&self) -> &EtagStore {
        &self.etags
    }

    /// Record for the entity owning `rel`, with `rel`'s etag merged in.
    /// `None` when no sidecar exists or `rel` maps to no sidecar location.
    pub fn read<R: SidecarRecord>(&self, rel: &Path) -> Result<Option<Tracked<R>>> {
        let Some(record) = self.read_record::<R>(rel)? else {
            return Ok(None);
        };
        let etag = self.etags.read(rel)?;
        Ok(Some(Tracked { record, etag }))
    }

    /// Record without the etag merge.
    pub fn read_record<R: SidecarRecord>(&self, rel: &Path) -> Result<Option<R>> {
        let Some(raw) = self.read_raw(rel, R::KIND)? else {
            return Ok(None);
        };
        let record = serde_json::from_value(Value::Object(raw))
            .with_context(|| format!("Malformed {} for {}", R::KIND.file_name(), rel.display()))?;
        Ok(Some(record))
    }

    fn read_raw(&self, rel: &Path, kind: MetadataKind) -> Result<Option<Map<String, Value>>> {
        let Some(path) = sidecar_path(rel, kind) else {
            return Ok(None);
        };
        let Some(text) = self.root.read_opt(&path)? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => anyhow::bail!("{} is not a JSON object", path.display()),
        }
    }

    /// Write `record` as the sidecar of the entity owning `rel`.
    pub fn write<R: SidecarRecord>(&self, rel: &Path, record: &R) -> Result<()> {
        let path = sidecar_path(rel, R::KIND).with_context(|| {
            format!("{} has no {} location", rel.display(), R::KIND.file_name())
        })?;
        let text = serde_json::to_string_pretty(record)?;
        self.root.write(&path, &text)
    }

    /// Merge `patch` over the stored record (etag excluded) and rewrite it.
    /// A missing record starts out empty.
    pub fn update<R: SidecarRecord>(&self, rel: &Path, patch: Map<String, Value>) -> Result<R> {
        let mut merged = self.read_raw(rel, R::KIND)?.unwrap_or_default();
        merged.extend(patch);

        let record: R = serde_json::from_value(Value::Object(merged))
            .with_context(|| format!("Patched {} is malformed", R::KIND.file_name()))?;
        self.write(rel, &record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> Result<(TempDir, SidecarStore)> {
        let tmp = TempDir::new()?;
        let store = SidecarStore::new(ContentRoot::new(tmp.path()));
        Ok((tmp, store))
    }

    #[test]
    fn sidecar_locations_by_kind() {
        let p = |s: &str, k| sidecar_path(Path::new(s), k).map(|p| p.display().to_string());

        assert_eq!(
            p("widget/Cart/instances/A/locales/en/ns.cart.json", MetadataKind::WidgetInstance)
                .as_deref(),
            Some(".ccc/widget/Cart/instances/A/widgetInstance.json")
        );
        assert_eq!(
            p("widget/Cart/instances/A/display.template", MetadataKind::Widget).as_deref(),
            Some(".ccc/widget/Cart/widget.json")
        );
        assert_eq!(
            p("widget/Cart/version/2/instances/A/widget.less", MetadataKind::Widget).as_deref(),
            Some(".ccc/widget/Cart/version/2/widget.json")
        );
        assert_eq!(
            p("widget/Header/element/Logo/element.js", MetadataKind::Element).as_deref(),
            Some(".ccc/widget/Header/element/Logo/element.json")
        );
        assert_eq!(
            p("theme/Red Theme/styles.less", MetadataKind::Theme).as_deref(),
            Some(".ccc/theme/Red Theme/theme.json")
        );
        assert_eq!(
            p("stack/Tabs/instances/Home/stack.less", MetadataKind::StackInstance).as_deref(),
            Some(".ccc/stack/Tabs/instances/Home/stackInstance.json")
        );
        assert_eq!(p("anything", MetadataKind::Config).as_deref(), Some(".ccc/config.json"));
        assert_eq!(p("global/app.js", MetadataKind::Widget), None);
        assert_eq!(p("widget/Cart/widget.less", MetadataKind::WidgetInstance), None);
    }

    #[test]
    fn write_then_read_is_identical() -> Result<()> {
        let (_tmp, store) = store()?;
        let rel = Path::new("widget/Cart");
        let record = WidgetRecord {
            repository_id: "rep1".into(),
            widget_type: "cartSummary".into(),
            version: 3,
            display_name: "Cart Summary".into(),
            source: Some(101),
            ..Default::default()
        };

        store.write(rel, &record)?;
        let first = store.root().read(Path::new(".ccc/widget/Cart/widget.json"))?;
        let back = store.read_record::<WidgetRecord>(rel)?;
        assert_eq!(back.as_ref(), Some(&record));

        // Rewriting what was read yields the same bytes
        store.write(rel, &back.unwrap_or_default())?;
        let second = store.root().read(Path::new(".ccc/widget/Cart/widget.json"))?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn read_merges_content_etag() -> Result<()> {
        let (_tmp, store) = store()?;
        let file = Path::new("theme/Red/styles.less");

        store.write(
            file,
            &ThemeRecord {
                repository_id: "111".into(),
                display_name: "Red".into(),
                ..Default::default()
            },
        )?;
        assert_eq!(store.read::<ThemeRecord>(file)?.and_then(|t| t.etag), None);

        store.etags().write(file, "tok")?;
        let tracked = store.read::<ThemeRecord>(file)?;
        assert_eq!(tracked.and_then(|t| t.etag).as_deref(), Some("tok"));
        Ok(())
    }

    #[test]
    fn missing_record_is_none() -> Result<()> {
        let (_tmp, store) = store()?;
        assert!(store.read::<ThemeRecord>(Path::new("theme/None/styles.less"))?.is_none());
        assert!(store.read::<WidgetRecord>(Path::new("global/app.js"))?.is_none());
        Ok(())
    }

    #[test]
    fn update_keeps_unknown_keys() -> Result<()> {
        let (_tmp, store) = store()?;
        let rel = Path::new("widget/Cart/instances/A");
        store.root().write(
            Path::new(".ccc/widget/Cart/instances/A/widgetInstance.json"),
            r#"{"repositoryId":"old","displayName":"A","version":1,"note":"hand edit"}"#,
        )?;

        let patch = json!({"repositoryId": "new", "descriptorRepositoryId": "d1"});
        let Value::Object(patch) = patch else { unreachable!() };
        let rec: WidgetInstanceRecord = store.update(rel, patch)?;

        assert_eq!(rec.repository_id, "new");
        assert_eq!(rec.descriptor_repository_id, "d1");
        assert_eq!(rec.display_name, "A");
        assert_eq!(rec.extra.get("note"), Some(&json!("hand edit")));
        Ok(())
    }

    #[test]
    fn config_accepts_legacy_version_key() -> Result<()> {
        let rec: ConfigRecord =
            serde_json::from_str(r#"{"node":"http://a","commerceCloudVersion":"21.1"}"#)?;
        assert_eq!(rec.repository_version.as_deref(), Some("21.1"));
        Ok(())
    }
}
