//! Filepath: src/infra/io.rs
//! File primitives scoped to a content root.
//! - All paths handed in are root-relative (absolute paths are re-rooted)
//! - Writes are atomic (same-dir tempfile + persist) and create parents
//! - The tracking tree mirrors the content tree under `.ccc/`

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::core::error::SyncError;
use crate::core::layout::TRACKING_DIR;

/// Root of a grabbed content tree.
#[derive(Debug, Clone)]
pub struct ContentRoot
{
    root: PathBuf,
}

impl ContentRoot
{
    /// Use `root` as is. The directory does not need to exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self
    {
        Self { root: root.into() }
    }

    /// Walk up from `start` to the nearest directory holding a tracking tree.
    pub fn discover(start: &Path) -> Result<Self>
    {
        let start = dunce::canonicalize(start)
            .with_context(|| format!("Failed to resolve {}", start.display()))?;

        start
            .ancestors()
            .find(|dir| {
                dir.join(TRACKING_DIR)
                    .is_dir()
            })
            .map(Self::new)
            .ok_or_else(|| SyncError::NotTracked(start.clone()).into())
    }

    pub fn root(&self) -> &Path
    {
        &self.root
    }

    /// Map any path (absolute or root-relative) to a clean root-relative one.
    pub fn relative(
        &self,
        path: &Path,
    ) -> Result<PathBuf>
    {
        let rel = if path.is_absolute()
        {
            let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            let root = dunce::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
            canonical
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .with_context(|| {
                    format!("{} is outside {}", path.display(), self.root.display())
                })?
        }
        else
        {
            path.to_path_buf()
        };

        // Reject anything escaping the root
        let mut out = PathBuf::new();
        for c in rel.components()
        {
            match c
            {
                Component::Normal(s) => out.push(s),
                Component::CurDir => {}
                _ => bail!("path escapes the content root: {}", path.display()),
            }
        }
        Ok(out)
    }

    pub fn absolute(
        &self,
        rel: &Path,
    ) -> PathBuf
    {
        self.root
            .join(rel)
    }

    pub fn exists(
        &self,
        rel: &Path,
    ) -> bool
    {
        self.absolute(rel)
            .exists()
    }

    pub fn is_dir(
        &self,
        rel: &Path,
    ) -> bool
    {
        self.absolute(rel)
            .is_dir()
    }

    pub fn read(
        &self,
        rel: &Path,
    ) -> Result<String>
    {
        let path = self.absolute(rel);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Read a file, `None` when it does not exist.
    pub fn read_opt(
        &self,
        rel: &Path,
    ) -> Result<Option<String>>
    {
        let path = self.absolute(rel);
        match fs::read_to_string(&path)
        {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Atomically write `contents`, creating parent directories.
    pub fn write(
        &self,
        rel: &Path,
        contents: &str,
    ) -> Result<()>
    {
        write_atomic(&self.absolute(rel), contents.as_bytes())
    }

    /// Create `rel` in both the content tree and the tracking tree.
    pub fn make_tracked_dir(
        &self,
        rel: &Path,
    ) -> Result<()>
    {
        for dir in [self.absolute(rel), self.absolute(&tracked(rel))]
        {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Remove a directory tree if present.
    pub fn remove_dir_all(
        &self,
        rel: &Path,
    ) -> Result<()>
    {
        let path = self.absolute(rel);
        match fs::remove_dir_all(&path)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Remove a file if present.
    pub fn remove_file(
        &self,
        rel: &Path,
    ) -> Result<()>
    {
        let path = self.absolute(rel);
        match fs::remove_file(&path)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Root-relative location of `rel` inside the tracking tree.
pub fn tracked(rel: &Path) -> PathBuf
{
    Path::new(TRACKING_DIR).join(rel)
}

/// Atomic write through a same-directory tempfile.
pub fn write_atomic(
    path: &Path,
    data: &[u8],
) -> Result<()>
{
    let dir = path
        .parent()
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(data)?;
    tmp.as_file()
        .sync_all()?;

    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests
{
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn write_creates_parents_and_reads_back() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = ContentRoot::new(tmp.path());

        root.write(Path::new("widget/Cart/widget.less"), ".a{}")?;
        assert_eq!(root.read(Path::new("widget/Cart/widget.less"))?, ".a{}");
        assert_eq!(root.read_opt(Path::new("widget/Cart/missing.less"))?, None);
        Ok(())
    }

    #[test]
    fn discover_finds_tracking_ancestor() -> Result<()>
    {
        let tmp = TempDir::new()?;
        fs::create_dir_all(tmp.path().join(".ccc"))?;
        fs::create_dir_all(tmp.path().join("widget/Cart/js"))?;

        let root = ContentRoot::discover(&tmp.path().join("widget/Cart/js"))?;
        assert_eq!(
            dunce::canonicalize(root.root())?,
            dunce::canonicalize(tmp.path())?
        );
        Ok(())
    }

    #[test]
    fn discover_without_tracking_fails() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let err = ContentRoot::discover(tmp.path()).unwrap_err();
        assert!(err.downcast_ref::<SyncError>().is_some());
        Ok(())
    }

    #[test]
    fn relative_rejects_escape() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = ContentRoot::new(tmp.path());

        assert_eq!(
            root.relative(Path::new("./widget/Cart"))?,
            PathBuf::from("widget/Cart")
        );
        assert!(
            root.relative(Path::new("../outside"))
                .is_err()
        );

        fs::create_dir_all(tmp.path().join("theme/Red"))?;
        assert_eq!(
            root.relative(&tmp.path().join("theme/Red"))?,
            PathBuf::from("theme/Red")
        );
        Ok(())
    }

    #[test]
    fn make_tracked_dir_mirrors() -> Result<()>
    {
        let tmp = TempDir::new()?;
        let root = ContentRoot::new(tmp.path());

        root.make_tracked_dir(Path::new("stack/Tabs/instances"))?;
        assert!(root.is_dir(Path::new("stack/Tabs/instances")));
        assert!(root.is_dir(Path::new(".ccc/stack/Tabs/instances")));
        Ok(())
    }
}
