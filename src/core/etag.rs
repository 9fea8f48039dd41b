//! Etag files in the tracking tree.
//!
//! The etag for `widget/Cart/widget.less` lives at
//! `.ccc/widget/Cart/widget.less.etag` and holds the raw server token. Tokens
//! are compared byte for byte and only decoded for display.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tracing::debug;

use crate::core::layout::ETAG_SUFFIX;
use crate::infra::io::{ContentRoot, tracked};
use crate::infra::walk::ContentWalker;

/// Root-relative path of the etag file for a content path.
pub fn etag_path(rel: &Path) -> PathBuf {
    let mut name = rel.as_os_str().to_owned();
    name.push(ETAG_SUFFIX);
    tracked(Path::new(&name))
}

#[derive(Serialize)]
struct DummyEtag<'a> {
    version: u32,
    uri: &'a str,
    hash: &'a str,
}

/// Placeholder token for content that exists locally but not yet remotely.
pub fn dummy_etag(etag_rel: &Path) -> String {
    let uri = etag_rel
        .to_string_lossy()
        .replace('\\', "/");
    let body = DummyEtag { version: 0, uri: &uri, hash: "dummy" };
    // Serializing a plain struct of strings cannot fail
    let json = serde_json::to_string(&body).unwrap_or_default();
    STANDARD.encode(json)
}

/// Decode a base64 JSON etag for display.
pub fn decode_etag(etag: &str) -> Result<serde_json::Value> {
    let bytes = STANDARD
        .decode(etag.trim())
        .context("etag is not base64")?;
    serde_json::from_slice(&bytes).context("etag does not hold JSON")
}

#[derive(Debug, Clone)]
pub struct EtagStore {
    root: ContentRoot,
}

impl EtagStore {
    pub fn new(root: ContentRoot) -> Self {
        Self { root }
    }

    /// Current token for `rel`, `None` when the file was never tracked.
    pub fn read(&self, rel: &Path) -> Result<Option<String>> {
        Ok(self
            .root
            .read_opt(&etag_path(rel))?
            .filter(|s| !s.is_empty()))
    }

    pub fn write(&self, rel: &Path, etag: &str) -> Result<()> {
        debug!(path = %rel.display(), "storing etag");
        self.root.write(&etag_path(rel), etag)
    }

    /// Store the server's token or, without one, drop the stale local one.
    pub fn record(&self, rel: &Path, etag: Option<&str>) -> Result<()> {
        match etag {
            Some(etag) => self.write(rel, etag),
            None => self.clear(rel),
        }
    }

    pub fn clear(&self, rel: &Path) -> Result<()> {
        self.root.remove_file(&etag_path(rel))
    }

    pub fn write_dummy(&self, rel: &Path) -> Result<()> {
        let path = etag_path(rel);
        self.root.write(&path, &dummy_etag(&path))
    }

    /// Replace every etag under `rel_dir` with a dummy token.
    pub fn reset_tree(&self, rel_dir: &Path) -> Result<usize> {
        let tracked_dir = self.root.absolute(&tracked(rel_dir));
        if !tracked_dir.is_dir() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in ContentWalker::new().walk(&tracked_dir) {
            let is_etag = entry
                .path
                .to_str()
                .is_some_and(|p| p.ends_with(ETAG_SUFFIX));
            if entry.is_dir || !is_etag {
                continue;
            }
            let rel = self.root.relative(&entry.path)?;
            self.root.write(&rel, &dummy_etag(&rel))?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn etag_path_mirrors_content() {
        assert_eq!(
            etag_path(Path::new("widget/Cart/widget.less")),
            PathBuf::from(".ccc/widget/Cart/widget.less.etag")
        );
    }

    #[test]
    fn dummy_etag_encodes_uri() -> Result<()> {
        let token = dummy_etag(Path::new("/etag/path"));
        assert_eq!(
            String::from_utf8(STANDARD.decode(&token)?)?,
            r#"{"version":0,"uri":"/etag/path","hash":"dummy"}"#
        );
        assert_eq!(decode_etag(&token)?["hash"], "dummy");
        Ok(())
    }

    #[test]
    fn write_read_clear() -> Result<()> {
        let tmp = TempDir::new()?;
        let store = EtagStore::new(ContentRoot::new(tmp.path()));
        let rel = Path::new("theme/Red/styles.less");

        assert_eq!(store.read(rel)?, None);
        store.write(rel, "abc123")?;
        assert_eq!(store.read(rel)?.as_deref(), Some("abc123"));

        store.record(rel, None)?;
        assert_eq!(store.read(rel)?, None);
        Ok(())
    }

    #[test]
    fn reset_tree_rewrites_all_tokens() -> Result<()> {
        let tmp = TempDir::new()?;
        let store = EtagStore::new(ContentRoot::new(tmp.path()));
        let dir = Path::new("widget/Cart/instances/A");

        store.write(&dir.join("display.template"), "real1")?;
        store.write(&dir.join("locales/en/ns.cart.json"), "real2")?;
        store.write(Path::new("widget/Cart/widget.less"), "keep")?;

        assert_eq!(store.reset_tree(dir)?, 2);
        let token = store
            .read(&dir.join("display.template"))?
            .unwrap_or_default();
        assert_eq!(decode_etag(&token)?["version"], 0);
        assert_eq!(store.read(Path::new("widget/Cart/widget.less"))?.as_deref(), Some("keep"));
        Ok(())
    }
}
