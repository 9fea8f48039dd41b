//! Download side: pull the node's editable content into a local tree.
//!
//! Collections are grabbed one after another (stacks, widgets, widget
//! instances, text snippets, elements, themes, application JavaScript).
//! Inside a collection, entities are fetched with bounded concurrency.
//! Every file lands together with its etag; a collection or entity that
//! fails is reported and the grab moves on.

mod element;
mod global;
mod stack;
mod theme;
mod widget;

use std::iter::Sum;
use std::ops::AddAssign;
use std::path::Path;

use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::layout::CLEANABLE_DIRS;
use crate::core::run::RunConfig;
use crate::core::sidecar::{ConfigRecord, SidecarStore};
use crate::core::transport::{ApiCall, ApiResponse, Endpoint, Transport};
use crate::infra::io::ContentRoot;

pub use widget::{WidgetDirs, insert_less_token, latest_by_name};

/// Files written, entities left alone as newer on disk, and failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    pub fn skipped() -> Self {
        Self { skipped: 1, ..Self::default() }
    }

    /// Count one file step: written files on success, a failure otherwise.
    pub fn absorb(&mut self, what: &str, step: Result<usize>) {
        match step {
            Ok(n) => self.written += n,
            Err(e) => {
                warn!(what, error = %format!("{e:#}"), "grab step failed");
                self.failed += 1;
            }
        }
    }

    /// Outcome of a whole entity; an error counts as one failure.
    pub fn entity(name: &str, result: Result<Tally>) -> Tally {
        result.unwrap_or_else(|e| {
            warn!(entity = name, error = %format!("{e:#}"), "failed to grab");
            Tally { failed: 1, ..Tally::default() }
        })
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.written += rhs.written;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

impl Sum for Tally {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Tally::default(), |mut acc, t| {
            acc += t;
            acc
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub name: &'static str,
    #[serde(flatten)]
    pub tally: Tally,
    /// Set when the collection could not be listed at all
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GrabReport {
    pub collections: Vec<CollectionReport>,
}

impl GrabReport {
    fn push(&mut self, name: &'static str, result: Result<Tally>) {
        let report = match result {
            Ok(tally) => {
                info!(
                    collection = name,
                    written = tally.written,
                    skipped = tally.skipped,
                    failed = tally.failed,
                    "collection grabbed"
                );
                CollectionReport { name, tally, error: None }
            }
            Err(e) => {
                let message = format!("{e:#}");
                warn!(collection = name, error = %message, "could not grab collection");
                CollectionReport {
                    name,
                    tally: Tally { failed: 1, ..Tally::default() },
                    error: Some(message),
                }
            }
        };
        self.collections.push(report);
    }

    pub fn totals(&self) -> Tally {
        self.collections.iter().map(|c| c.tally).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.totals().failed > 0
    }
}

/// Shared state for one grab.
pub struct GrabContext<'a> {
    pub run: &'a RunConfig,
    pub transport: &'a dyn Transport,
    pub sidecar: SidecarStore,
}

impl GrabContext<'_> {
    pub fn root(&self) -> &ContentRoot {
        self.sidecar.root()
    }

    /// Locale names to grab per-locale content for.
    pub fn locales(&self) -> Vec<String> {
        self.transport
            .locales()
            .iter()
            .map(|l| l.name.clone())
            .collect()
    }

    /// Content and etag land together; no etag clears a stale one.
    pub fn write_with_etag(&self, rel: &Path, contents: &str, etag: Option<&str>) -> Result<()> {
        self.root().write(rel, contents)?;
        self.sidecar.etags().record(rel, etag)
    }

    /// Call `endpoint` and fail unless it succeeded.
    pub async fn fetch(&self, endpoint: Endpoint, call: ApiCall) -> Result<ApiResponse> {
        let resp = self.transport.call(endpoint, call).await?;
        if !resp.is_success() {
            bail!("{endpoint} failed: {}", resp.message());
        }
        Ok(resp)
    }

    /// Write string field `field` of the response to `rel`, after `transform`.
    /// Returns the number of files written; an empty field writes nothing.
    pub async fn copy_field(
        &self,
        endpoint: Endpoint,
        call: ApiCall,
        field: &str,
        rel: &Path,
        transform: impl FnOnce(&str) -> String,
    ) -> Result<usize> {
        let resp = self.fetch(endpoint, call).await?;
        match resp.field(field).filter(|s| !s.is_empty()) {
            Some(contents) => {
                self.write_with_etag(rel, &transform(contents), resp.etag.as_deref())?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Write JSON field `field` of the response to `rel`, pretty printed.
    pub async fn copy_json(
        &self,
        endpoint: Endpoint,
        call: ApiCall,
        field: &str,
        rel: &Path,
    ) -> Result<usize> {
        let resp = self.fetch(endpoint, call).await?;
        write_json_field(self, &resp, field, rel)
    }
}

/// Pretty-print `resp.data[field]` to `rel` with the response etag.
fn write_json_field(ctx: &GrabContext<'_>, resp: &ApiResponse, field: &str, rel: &Path) -> Result<usize> {
    match resp.data.get(field).filter(|v| !v.is_null()) {
        Some(value) => {
            let text = serde_json::to_string_pretty(value)?;
            ctx.write_with_etag(rel, &text, resp.etag.as_deref())?;
            Ok(1)
        }
        None => Ok(0),
    }
}

/// Object out of a `json!` literal, for sidecar patches.
pub(crate) fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Grab everything the node exposes into `base`.
///
/// With `clean`, existing content and bookkeeping are removed first, so
/// instances kept back as newer than the server's are fetched again too.
#[instrument(skip(transport, run), fields(node = %run.node, base = %base.display()))]
pub async fn grab(
    transport: &dyn Transport,
    run: &RunConfig,
    base: &Path,
    clean: bool,
) -> Result<GrabReport> {
    let root = ContentRoot::new(base);
    if clean {
        for dir in CLEANABLE_DIRS {
            root.remove_dir_all(Path::new(dir))?;
        }
        info!("removed previously grabbed content");
    }
    root.make_tracked_dir(Path::new(""))?;

    let ctx = GrabContext { run, transport, sidecar: SidecarStore::new(root) };
    write_config_record(&ctx)?;

    let mut report = GrabReport::default();
    report.push("stacks", stack::grab_stacks(&ctx).await);

    let dirs = match widget::grab_widgets(&ctx).await {
        Ok((tally, dirs)) => {
            report.push("widgets", Ok(tally));
            dirs
        }
        Err(e) => {
            report.push("widgets", Err(e));
            WidgetDirs::default()
        }
    };
    report.push("widget instances", widget::grab_instances(&ctx, &dirs).await);
    report.push("text snippets", global::grab_snippets(&ctx).await);
    report.push("elements", element::grab_elements(&ctx, &dirs).await);
    report.push("themes", theme::grab_themes(&ctx).await);
    report.push("application JavaScript", global::grab_application_javascript(&ctx).await);

    let totals = report.totals();
    info!(written = totals.written, skipped = totals.skipped, failed = totals.failed, "grab finished");
    Ok(report)
}

/// Record which node (and build) the tree came from.
fn write_config_record(ctx: &GrabContext<'_>) -> Result<ConfigRecord> {
    let here = Path::new("");
    let mut record = ctx
        .sidecar
        .read_record::<ConfigRecord>(here)?
        .unwrap_or_default();
    record.node = ctx.run.node.clone();
    record.repository_version = ctx.transport.repository_version().map(str::to_string);
    record.package_version = Some(env!("CARGO_PKG_VERSION").to_string());
    record.grabbed_at = Some(chrono::Utc::now().to_rfc3339());
    ctx.sidecar.write(here, &record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_sums_and_absorbs() {
        let mut t = Tally::default();
        t.absorb("a", Ok(2));
        t.absorb("b", Err(anyhow::anyhow!("boom")));
        t.absorb("c", Ok(0));
        assert_eq!(t, Tally { written: 2, skipped: 0, failed: 1 });

        let total: Tally = [t, Tally::skipped(), Tally::entity("x", Err(anyhow::anyhow!("no")))]
            .into_iter()
            .sum();
        assert_eq!(total, Tally { written: 2, skipped: 1, failed: 2 });
    }

    #[test]
    fn report_totals_include_collection_errors() {
        let mut report = GrabReport::default();
        report.push("themes", Ok(Tally { written: 3, ..Tally::default() }));
        report.push("stacks", Err(anyhow::anyhow!("getAllStackInstances failed")));
        assert_eq!(report.totals().written, 3);
        assert!(report.has_failures());
        assert_eq!(
            report.collections[1].error.as_deref(),
            Some("getAllStackInstances failed")
        );
    }
}
