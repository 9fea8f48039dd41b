//! Upload orchestrator.
//!
//! A put run goes through fixed steps:
//! 1. guard: the tree must belong to the destination node (or, in transfer
//!    mode, to a different node on the same build)
//! 2. snapshot: fetch the destination's entities
//! 3. discover: walk the target, keeping files and widget instance dirs
//! 4. pre-flight: files of themes/widgets missing remotely collapse into a
//!    single "create the whole directory" item
//! 5. order: stable sort by asset type
//! 6. dispatch: one item at a time, through an exhaustive match
//!
//! Items never abort the batch; each ends in a [`PutOutcome`].

mod element;
mod extension;
mod global;
mod stack;
mod theme;
mod widget;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::asset::AssetType;
use crate::core::classify::classify;
use crate::core::error::{PutOutcome, SyncError};
use crate::core::identity::IdentityResolver;
use crate::core::layout::{INSTANCES_DIR, THEMES_DIR, WIDGETS_DIR};
use crate::core::run::RunConfig;
use crate::core::sidecar::{
    ConfigRecord, MetadataKind, SidecarStore, ThemeRecord, WidgetRecord, entity_dir,
};
use crate::core::snapshot::RemoteSnapshot;
use crate::core::transport::{ApiCall, ApiResponse, Endpoint, Transport};
use crate::infra::io::ContentRoot;
use crate::infra::walk::ContentWalker;

/// One unit of upload work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlannedPut {
    pub rel: PathBuf,
    pub asset: AssetType,
}

/// Result of one item.
#[derive(Debug, Clone, Serialize)]
pub struct PutItemReport {
    pub path: PathBuf,
    pub asset: AssetType,
    pub outcome: PutOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PutReport {
    pub items: Vec<PutItemReport>,
}

impl PutReport {
    /// (label, count) per outcome kind, in severity order, zero counts omitted.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        ["applied", "unchanged", "skipped", "conflict", "rejected", "failed"]
            .into_iter()
            .map(|label| {
                let n = self
                    .items
                    .iter()
                    .filter(|i| i.outcome.label() == label)
                    .count();
                (label, n)
            })
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// Every item was applied or had nothing to do.
    pub fn succeeded(&self) -> bool {
        self.items.iter().all(|i| i.outcome.is_settled())
    }
}

/// Put `path` (a file, or with `recursive` a whole directory) to `run.node`.
#[instrument(skip(transport, run), fields(node = %run.node, transfer = run.transfer_mode))]
pub async fn put(
    transport: &dyn Transport,
    run: &RunConfig,
    path: &Path,
    recursive: bool,
) -> Result<PutReport> {
    // step 1: validate the target
    if !path.exists() {
        return Err(SyncError::PathMissing(path.to_path_buf()).into());
    }
    if recursive && !path.is_dir() {
        return Err(SyncError::NotADirectory(path.to_path_buf()).into());
    }

    let path = &dunce::canonicalize(path)
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let root = ContentRoot::discover(path)?;
    let sidecar = SidecarStore::new(root.clone());
    let config = sidecar
        .read_record::<ConfigRecord>(Path::new(""))?
        .ok_or_else(|| SyncError::NotTracked(root.root().to_path_buf()))?;

    // step 2: configuration guard, before any network write
    check_guard(run, &config, transport.repository_version())?;

    // step 3: destination snapshot
    let snapshot = RemoteSnapshot::initialize(transport, run).await?;
    let mut ctx = SyncContext { run, transport, sidecar, snapshot };

    let rel = root.relative(path)?;
    let items = if recursive {
        let entries = discover(&root, &rel);
        plan(entries, &ctx)
    } else {
        match classify(&rel, path.is_dir()) {
            Some(asset) => vec![PlannedPut { rel, asset }],
            None => {
                warn!(path = %rel.display(), "not a syncable asset; nothing to put");
                Vec::new()
            }
        }
    };

    info!(items = items.len(), "putting");
    let mut report = PutReport::default();
    for item in items {
        let outcome = ctx.put_item(&item).await;
        debug!(path = %item.rel.display(), outcome = outcome.label(), "item done");
        report.items.push(PutItemReport { path: item.rel, asset: item.asset, outcome });
    }
    Ok(report)
}

fn same_node(a: &str, b: &str) -> bool {
    a.trim_end_matches('/')
        .eq_ignore_ascii_case(b.trim_end_matches('/'))
}

/// Reject runs that would write ids from one installation into another.
pub fn check_guard(
    run: &RunConfig,
    config: &ConfigRecord,
    destination_version: Option<&str>,
) -> Result<(), SyncError> {
    if !run.transfer_mode {
        if !same_node(&config.node, &run.node) {
            return Err(SyncError::WrongNode {
                recorded: config.node.clone(),
                requested: run.node.clone(),
            });
        }
        return Ok(());
    }

    if same_node(&config.node, &run.node) {
        return Err(SyncError::SameNodeTransfer(run.node.clone()));
    }

    let source = config.repository_version.as_deref().unwrap_or_default();
    let destination = destination_version.unwrap_or_default();
    if source != destination {
        return Err(SyncError::VersionMismatch {
            source_version: source.to_string(),
            destination_version: destination.to_string(),
        });
    }
    Ok(())
}

/// Files plus widget instance directories under `rel`, root-relative, in
/// walk order.
pub fn discover(root: &ContentRoot, rel: &Path) -> Vec<(PathBuf, bool)> {
    ContentWalker::new()
        .walk(root.absolute(rel))
        .into_iter()
        .filter_map(|entry| {
            let rel = root.relative(&entry.path).ok()?;
            let keep = !entry.is_dir || classify(&rel, true) == Some(AssetType::WidgetInstance);
            keep.then_some((rel, entry.is_dir))
        })
        .collect()
}

/// Destination existence checks used by [`plan`].
pub trait ExistenceCheck {
    /// Missing themes are only created when transferring.
    fn transfer_mode(&self) -> bool;
    /// Whether the theme owning `rel` exists on the destination.
    fn theme_exists(&self, rel: &Path) -> bool;
    /// Whether the widget owning `rel` exists on the destination.
    fn widget_exists(&self, rel: &Path) -> bool;
}

/// Pre-flight and ordering over discovered entries.
pub fn plan(entries: Vec<(PathBuf, bool)>, remote: &dyn ExistenceCheck) -> Vec<PlannedPut> {
    let mut kept = Vec::with_capacity(entries.len());
    let mut units: IndexSet<PlannedPut> = IndexSet::new();

    for (rel, is_dir) in entries {
        let segs: Vec<_> = rel.iter().collect();
        let under = |top: &str| segs.first().is_some_and(|s| *s == top);
        let instance_scoped = segs.iter().any(|s| *s == INSTANCES_DIR);

        if under(THEMES_DIR) && remote.transfer_mode() && !remote.theme_exists(&rel) {
            if let Some(dir) = entity_dir(&rel, MetadataKind::Theme) {
                units.insert(PlannedPut { rel: dir, asset: AssetType::Theme });
                continue;
            }
        }

        if under(WIDGETS_DIR) && !instance_scoped && !remote.widget_exists(&rel) {
            if let Some(dir) = entity_dir(&rel, MetadataKind::Widget) {
                units.insert(PlannedPut { rel: dir, asset: AssetType::Widget });
                continue;
            }
        }

        kept.push((rel, is_dir));
    }

    let mut items: Vec<PlannedPut> = kept
        .into_iter()
        .filter_map(|(rel, is_dir)| match classify(&rel, is_dir) {
            Some(asset) => Some(PlannedPut { rel, asset }),
            None => {
                if !is_dir {
                    warn!(path = %rel.display(), "not a syncable asset; skipping");
                }
                None
            }
        })
        .chain(units)
        .collect();

    // Stable: ties keep walk order
    items.sort_by_key(|item| item.asset);
    items
}

/// Everything a handler needs, built once per run.
pub struct SyncContext<'a> {
    pub run: &'a RunConfig,
    pub transport: &'a dyn Transport,
    pub sidecar: SidecarStore,
    pub snapshot: RemoteSnapshot,
}

impl<'a> SyncContext<'a> {
    pub fn resolver(&self) -> IdentityResolver<'_> {
        IdentityResolver::new(self.run.transfer_mode, &self.sidecar, &self.snapshot)
    }

    pub fn root(&self) -> &ContentRoot {
        self.sidecar.root()
    }

    pub fn read(&self, rel: &Path) -> Result<String> {
        self.root().read(rel)
    }

    /// Parse a JSON content file.
    pub fn read_json(&self, rel: &Path) -> Result<serde_json::Value> {
        let text = self.read(rel)?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {e}", rel.display()))
    }

    /// Soft skip when the server lacks a capability.
    pub fn require(&self, endpoint: Endpoint, rel: &Path) -> Option<PutOutcome> {
        if self.transport.supports(endpoint) {
            return None;
        }
        warn!(
            path = %rel.display(),
            %endpoint,
            "the destination does not support this operation; skipping"
        );
        Some(PutOutcome::skipped(format!("server lacks {endpoint}")))
    }

    /// Issue a write for `rel` and settle its etag.
    pub async fn send(&self, rel: &Path, endpoint: Endpoint, call: ApiCall) -> Result<PutOutcome> {
        debug!(path = %rel.display(), %endpoint, "sending");
        let resp = self.transport.call(endpoint, call).await?;
        self.settle(rel, &resp)
    }

    /// 2xx stores the returned etag; 412 and other failures leave it alone.
    pub fn settle(&self, rel: &Path, resp: &ApiResponse) -> Result<PutOutcome> {
        if resp.status == 412 {
            error!(
                path = %rel.display(),
                "already modified remotely; grab it again and reapply your change"
            );
            return Ok(PutOutcome::Conflict);
        }

        if !resp.is_success() {
            let message = resp.message();
            warn!(path = %rel.display(), status = resp.status, %message, "unexpected server error");
            return Ok(PutOutcome::Rejected { status: resp.status, message });
        }

        // Etags belong to the installation the tree was grabbed from
        if !self.run.transfer_mode {
            self.sidecar
                .etags()
                .record(rel, resp.etag.as_deref())?;
        }
        info!(path = %rel.display(), "updated");
        Ok(PutOutcome::Applied)
    }

    /// Dispatch one item to its handler.
    pub async fn put_item(&mut self, item: &PlannedPut) -> PutOutcome {
        let rel = item.rel.as_path();

        use AssetType::*;
        let result = match item.asset {
            Theme => theme::put_theme(self, rel).await,
            ThemeVariables | ThemeStyles | ThemeAdditionalStyles => {
                theme::put_theme_file(self, rel, item.asset).await
            }

            Widget => widget::put_widget(self, rel).await,
            WidgetMetadataJson => widget::put_widget_metadata(self, rel).await,
            WidgetBaseTemplate | WidgetBaseLess | WidgetBaseSnippets => {
                widget::put_widget_base_file(self, rel, item.asset).await
            }
            WidgetConfigJson => widget::put_config_metadata(self, rel).await,
            WidgetConfigSnippets => widget::put_config_snippets(self, rel).await,
            WidgetJavascript => widget::put_widget_javascript(self, rel).await,
            WidgetModuleJavascript => widget::put_module_javascript(self, rel).await,

            WidgetInstance => widget::put_widget_instance(self, rel).await,
            WidgetInstanceMetadataJson => widget::put_instance_metadata(self, rel).await,
            WidgetInstanceTemplate => widget::put_instance_template(self, rel).await,
            WebContentTemplate => widget::put_web_content(self, rel).await,
            WidgetInstanceLess => widget::put_instance_less(self, rel).await,
            WidgetInstanceSnippets => widget::put_instance_snippets(self, rel).await,

            GlobalElementTemplate | GlobalElementJavascript | ElementTemplate
            | ElementJavascript => element::put_element_file(self, rel, item.asset).await,

            StackInstanceTemplate | StackInstanceVariablesLess | StackInstanceLess => {
                stack::put_stack_instance_file(self, rel, item.asset).await
            }

            GlobalSnippets => global::put_global_snippets(self, rel).await,
            ApplicationJavascript => global::put_application_javascript(self, rel).await,
        };

        result.unwrap_or_else(|e| {
            match e.downcast_ref::<SyncError>() {
                Some(SyncError::InstanceNotCreated(_)) => error!(path = %rel.display(), "{e:#}"),
                _ => warn!(path = %rel.display(), "put failed: {e:#}"),
            }
            PutOutcome::Failed(format!("{e:#}"))
        })
    }
}

impl ExistenceCheck for SyncContext<'_> {
    fn transfer_mode(&self) -> bool {
        self.run.transfer_mode
    }

    fn theme_exists(&self, rel: &Path) -> bool {
        // Hand-made theme directories have no record yet; use the dir name
        let name = match self.sidecar.read_record::<ThemeRecord>(rel) {
            Ok(Some(record)) => record.display_name,
            _ => match entity_dir(rel, MetadataKind::Theme).and_then(|d| {
                d.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            }) {
                Some(name) => name,
                None => return true,
            },
        };
        self.snapshot.has_theme(&name)
    }

    fn widget_exists(&self, rel: &Path) -> bool {
        // Without local metadata the per-file handler reports the problem
        match self.sidecar.read_record::<WidgetRecord>(rel) {
            Ok(Some(record)) => self
                .snapshot
                .has_descriptor(&record.display_name, record.version),
            _ => true,
        }
    }
}

/// Identity could not be resolved: warn and skip the item.
pub(crate) fn cannot_update(rel: &Path) -> PutOutcome {
    warn!(path = %rel.display(), "cannot update: no matching remote entity");
    PutOutcome::skipped("no matching remote entity")
}

/// Parent directory name of a path, e.g. the locale of `locales/<L>/ns.x.json`.
pub(crate) fn parent_name(rel: &Path) -> Option<String> {
    rel.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
}

/// Final path component as a string.
pub(crate) fn file_name(rel: &Path) -> String {
    rel.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Remote {
        transfer: bool,
        missing_widgets: HashSet<&'static str>,
        missing_themes: HashSet<&'static str>,
    }

    impl ExistenceCheck for Remote {
        fn transfer_mode(&self) -> bool {
            self.transfer
        }

        fn theme_exists(&self, rel: &Path) -> bool {
            !self
                .missing_themes
                .iter()
                .any(|t| rel.starts_with(Path::new("theme").join(t)))
        }

        fn widget_exists(&self, rel: &Path) -> bool {
            !self
                .missing_widgets
                .iter()
                .any(|w| rel.starts_with(Path::new("widget").join(w)))
        }
    }

    fn files(paths: &[&str]) -> Vec<(PathBuf, bool)> {
        paths.iter().map(|p| (PathBuf::from(p), false)).collect()
    }

    fn assets(items: &[PlannedPut]) -> Vec<(String, AssetType)> {
        items
            .iter()
            .map(|i| (i.rel.display().to_string(), i.asset))
            .collect()
    }

    #[test]
    fn missing_widget_becomes_single_create_before_instances() {
        let remote = Remote {
            transfer: false,
            missing_widgets: HashSet::from(["Cart"]),
            missing_themes: HashSet::new(),
        };
        let entries = files(&[
            "widget/Cart/instances/A/display.template",
            "theme/Red/variables.less",
            "widget/Cart/js/cart.js",
            "widget/Cart/widget.less",
            "widget/Cart/instances/A/widget.less",
        ]);

        let items = plan(entries, &remote);
        assert_eq!(
            assets(&items),
            vec![
                ("theme/Red/variables.less".into(), AssetType::ThemeVariables),
                ("widget/Cart".into(), AssetType::Widget),
                ("widget/Cart/instances/A/display.template".into(), AssetType::WidgetInstanceTemplate),
                ("widget/Cart/instances/A/widget.less".into(), AssetType::WidgetInstanceLess),
            ]
        );
    }

    #[test]
    fn missing_theme_collapses_into_directory_when_transferring() {
        let mut remote = Remote {
            transfer: true,
            missing_widgets: HashSet::new(),
            missing_themes: HashSet::from(["Blue"]),
        };
        let entries = || {
            files(&[
                "theme/Blue/styles.less",
                "theme/Blue/variables.less",
                "theme/Red/styles.less",
            ])
        };

        let items = plan(entries(), &remote);
        assert_eq!(
            assets(&items),
            vec![
                ("theme/Blue".into(), AssetType::Theme),
                ("theme/Red/styles.less".into(), AssetType::ThemeStyles),
            ]
        );

        // Outside transfer mode theme files go through as they are
        remote.transfer = false;
        let items = plan(entries(), &remote);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.asset != AssetType::Theme));
    }

    #[test]
    fn ties_keep_walk_order_and_junk_is_dropped() {
        let remote = Remote {
            transfer: false,
            missing_widgets: HashSet::new(),
            missing_themes: HashSet::new(),
        };
        let mut entries = files(&[
            "widget/B/js/b.js",
            "README.md",
            "widget/A/js/a.js",
            "widget/A/instances/X/widget.less",
        ]);
        entries.push((PathBuf::from("widget/A/instances/X"), true));

        let items = plan(entries, &remote);
        assert_eq!(
            assets(&items),
            vec![
                ("widget/B/js/b.js".into(), AssetType::WidgetJavascript),
                ("widget/A/js/a.js".into(), AssetType::WidgetJavascript),
                ("widget/A/instances/X".into(), AssetType::WidgetInstance),
                ("widget/A/instances/X/widget.less".into(), AssetType::WidgetInstanceLess),
            ]
        );
    }

    #[test]
    fn guard_rules() {
        let config = ConfigRecord {
            node: "https://source.example.com/".into(),
            repository_version: Some("21.2".into()),
            ..Default::default()
        };

        let normal = RunConfig::new("https://source.example.com");
        assert!(check_guard(&normal, &config, Some("21.2")).is_ok());

        let wrong = RunConfig::new("https://other.example.com");
        assert!(matches!(
            check_guard(&wrong, &config, Some("21.2")),
            Err(SyncError::WrongNode { .. })
        ));

        let transfer = RunConfig::new("https://other.example.com").transfer(true);
        assert!(check_guard(&transfer, &config, Some("21.2")).is_ok());
        assert!(matches!(
            check_guard(&transfer, &config, Some("22.1")),
            Err(SyncError::VersionMismatch { .. })
        ));

        let same = RunConfig::new("https://source.example.com").transfer(true);
        assert!(matches!(
            check_guard(&same, &config, Some("21.2")),
            Err(SyncError::SameNodeTransfer(_))
        ));
    }

    #[test]
    fn report_counts() {
        let item = |outcome| PutItemReport {
            path: PathBuf::from("x"),
            asset: AssetType::GlobalSnippets,
            outcome,
        };
        let report = PutReport {
            items: vec![
                item(PutOutcome::Applied),
                item(PutOutcome::Applied),
                item(PutOutcome::unchanged("instance already exists")),
                item(PutOutcome::Conflict),
            ],
        };
        assert_eq!(
            report.counts(),
            vec![("applied", 2), ("unchanged", 1), ("conflict", 1)]
        );
        assert!(!report.succeeded());

        // Nothing-to-do items do not fail the run
        let mut settled = report;
        settled.items.retain(|i| i.outcome != PutOutcome::Conflict);
        assert!(settled.succeeded());
    }
}
