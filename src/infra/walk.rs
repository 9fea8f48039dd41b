//! Filepath: src/infra/walk.rs
//! Depth-first walker over a content tree.
//! - Yields files and directories (the root itself is not yielded)
//! - Skips hidden entries, which also prunes the `.ccc` tracking tree
//! - Ignore files are not honoured; every visible entry is content
//! - Deterministic ordering (sorted by file name at each level)
//!
//! Backed by ripgrep's `ignore` crate.

use std::path::{Path, PathBuf};

use ignore::{DirEntry, WalkBuilder};

use crate::core::layout::TRACKING_DIR;

/// One walked entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry
{
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Content-tree walker with an optional per-entry continuation filter.
pub struct ContentWalker
{
    /// Include hidden (dot) entries; default false
    include_hidden: bool,
}

impl Default for ContentWalker
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ContentWalker
{
    pub fn new() -> Self
    {
        Self { include_hidden: false }
    }

    /// (Optional) Include hidden entries. The tracking tree stays excluded.
    pub fn with_include_hidden(
        mut self,
        include_hidden: bool,
    ) -> Self
    {
        self.include_hidden = include_hidden;
        self
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        //   WalkBuilder::hidden(true)  => *skip* dotfiles
        b.hidden(!self.include_hidden);

        // Content trees are not source repos; every visible entry counts
        b.ignore(false);
        b.git_ignore(false);
        b.git_global(false);
        b.git_exclude(false);
        b.parents(false);

        b.follow_links(false);
        b.sort_by_file_name(|a, b| a.cmp(b));

        b
    }

    /// Walk `root` and return every file and directory below it.
    pub fn walk<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<WalkEntry>
    {
        self.walk_with_filter(root, |_, _| true)
    }

    /// Walk `root`, keeping entries accepted by `keep`. A rejected
    /// directory is not descended into.
    pub fn walk_with_filter<P, F>(
        &self,
        root: P,
        keep: F,
    ) -> Vec<WalkEntry>
    where
        P: AsRef<Path>,
        F: Fn(&Path, bool) -> bool + Send + Sync + 'static,
    {
        let root_path = root.as_ref();
        let mut builder = self.build_walk(root_path);

        // Continuation control; rejected dirs are pruned, bookkeeping always is
        builder.filter_entry(move |ent: &DirEntry| {
            let is_dir = ent
                .file_type()
                .is_some_and(|ft| ft.is_dir());
            ent.depth() == 0 || (ent.file_name() != TRACKING_DIR && keep(ent.path(), is_dir))
        });

        builder
            .build()
            // Drop entries with IO errors
            .filter_map(|res| res.ok())
            .filter(|entry| entry.depth() > 0)
            .map(|entry| {
                let is_dir = entry
                    .file_type()
                    .is_some_and(|ft| ft.is_dir());
                WalkEntry { path: entry.into_path(), is_dir }
            })
            .collect()
    }
}
