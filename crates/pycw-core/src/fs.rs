use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;

/// Adds owner read/write permission (and search, for directories) so the
/// entry can be rewritten or unlinked.
#[cfg(unix)]
pub(crate) fn ensure_owner_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path)?;
    let wanted = if meta.is_dir() { 0o700 } else { 0o600 };
    let mode = meta.permissions().mode();
    if mode & wanted != wanted {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | wanted))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn ensure_owner_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Best-effort unlock of a tree whose modes came from an archive.
fn make_writable_recursive(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let _ = ensure_owner_writable(path);
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

/// Scratch directory holding one extracted wheel.
///
/// Dropping it removes the tree, even when restored archive modes left parts
/// of it read-only.
#[derive(Debug)]
pub(crate) struct ExtractionDir {
    dir: Option<TempDir>,
}

impl ExtractionDir {
    /// Creates the directory below `parent`, or the system temp dir when `None`.
    pub(crate) fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pyc-wheel-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir: Some(dir) })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map_or_else(|| Path::new(""), TempDir::path)
    }
}

impl Drop for ExtractionDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            make_writable_recursive(dir.path());
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                tracing::debug!(path = %path.display(), %err, "failed to remove extraction dir");
                let _ = fs::remove_dir_all(&path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_dir_is_removed_on_drop() -> io::Result<()> {
        let dir = ExtractionDir::new(None)?;
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join("pkg"))?;
        fs::write(root.join("pkg/mod.pyc"), b"x")?;
        drop(dir);
        assert!(!root.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn extraction_dir_removes_read_only_trees() -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = ExtractionDir::new(None)?;
        let root = dir.path().to_path_buf();
        let locked = root.join("locked");
        fs::create_dir_all(&locked)?;
        fs::write(locked.join("data.txt"), b"x")?;
        fs::set_permissions(locked.join("data.txt"), fs::Permissions::from_mode(0o444))?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555))?;
        drop(dir);
        assert!(!root.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn owner_write_bit_is_added() -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("RECORD");
        fs::write(&file, b"x")?;
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444))?;
        ensure_owner_writable(&file)?;
        assert_eq!(fs::metadata(&file)?.permissions().mode() & 0o777, 0o644);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn locked_directory_regains_owner_search() -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let locked = dir.path().join("pkg");
        fs::create_dir(&locked)?;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500))?;
        ensure_owner_writable(&locked)?;
        assert_eq!(fs::metadata(&locked)?.permissions().mode() & 0o777, 0o700);
        Ok(())
    }
}
