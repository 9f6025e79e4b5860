//! Writing the merged kubeconfig to disk.
//!
//! The previous file is copied to `<file>.backup.<YYYYMMDDHHMMSS>` first, then
//! the new content is written to a hidden sibling and renamed into place, so
//! the target is never observed half-written.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use kubepull_shared::{KubepullError, Result};

/// What [`persist`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub path: PathBuf,
    /// Copy of the previous file, if one existed and the content changed.
    pub backup: Option<PathBuf>,
    /// The file already held exactly this content; nothing was touched.
    pub unchanged: bool,
}

/// Read the local kubeconfig; a missing file is `None`.
pub fn read_existing(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KubepullError::io(path, e)),
    }
}

/// Back up the current file (if any) and atomically replace it with `content`.
#[instrument(skip_all, fields(path = %path.display(), bytes = content.len()))]
pub fn persist(path: &Path, content: &str) -> Result<PersistOutcome> {
    let previous = read_existing(path)?;

    if previous.as_deref() == Some(content) {
        info!("kubeconfig already up to date");
        return Ok(PersistOutcome {
            path: path.to_path_buf(),
            backup: None,
            unchanged: true,
        });
    }

    let backup = match previous {
        Some(_) => Some(backup_file(path)?),
        None => None,
    };

    write_atomic(path, content)?;
    info!(backup = ?backup.as_ref().map(|p| p.display().to_string()), "kubeconfig written");

    Ok(PersistOutcome {
        path: path.to_path_buf(),
        backup,
        unchanged: false,
    })
}

/// Copy `path` to a timestamped sibling and return the backup's path.
pub fn backup_file(path: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let backup = available_backup_path(path, &stamp);

    std::fs::copy(path, &backup).map_err(|e| KubepullError::io(&backup, e))?;
    debug!(backup = %backup.display(), "previous kubeconfig backed up");
    Ok(backup)
}

/// `<file>.backup.<stamp>`, with a numeric suffix if that name is taken.
fn available_backup_path(path: &Path, stamp: &str) -> PathBuf {
    let base = format!("{}.backup.{stamp}", path.display());
    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}.{n}"));
        n += 1;
    }
    candidate
}

/// Write to `.<file>.tmp` next to `path`, then rename over it.
///
/// An existing symlink is followed so the rename replaces the file it points
/// at and the link itself survives.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let resolved = resolve_target(path)?;
    let path = resolved.as_path();

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| KubepullError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| KubepullError::validation(format!("{} is not a file path", path.display())))?
        .to_string_lossy();
    let temp = parent.join(format!(".{file_name}.tmp"));

    if let Err(e) = write_private(&temp, content) {
        let _ = std::fs::remove_file(&temp);
        return Err(KubepullError::io(&temp, e));
    }

    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(KubepullError::io(path, e));
    }

    Ok(())
}

/// Canonical form of an existing `path`; a missing one is used as given.
fn resolve_target(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(real) => {
            if real != path {
                debug!(target_file = %real.display(), "writing through link");
            }
            Ok(real)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(KubepullError::io(path, e)),
    }
}

/// Create (or truncate) `path` readable by the owner only.
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    // mode() only applies on creation; a stale temp file keeps its old bits
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
