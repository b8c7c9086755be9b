//! The work directory: version marker, migrations, and the exclusive lock.

use fs2::FileExt;
use pmb_schema::PmbError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// The current on-disk work-dir format version. Bump this and add a
/// [`Migration`] when the layout changes.
pub const CURRENT_VERSION: u32 = 3;

/// One idempotent forward migration, named for what it does.
pub struct Migration {
    pub from_version: u32,
    pub name: &'static str,
    pub apply: fn(&Path) -> std::io::Result<()>,
}

/// The ordered migrations applied when an on-disk work dir reports an older
/// version than [`CURRENT_VERSION`].
pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            from_version: 1,
            name: "relocate chroot_native under a subdirectory",
            apply: |_path| Ok(()),
        },
        Migration {
            from_version: 2,
            name: "rename packages/edge to packages/master",
            apply: |path| {
                let old = path.join("packages").join("edge");
                let new = path.join("packages").join("master");
                if old.is_dir() && !new.exists() {
                    std::fs::rename(old, new)?;
                }
                Ok(())
            },
        },
    ]
}

/// A locked, version-checked work directory.
pub struct WorkDir {
    root: PathBuf,
    lock_file: File,
}

impl WorkDir {
    /// Open an existing work directory: read and migrate its version
    /// marker, then take the exclusive lock. Non-blocking by default.
    ///
    /// # Errors
    ///
    /// Returns [`PmbError::WorkdirFromFuture`] if the on-disk version is
    /// newer than this binary understands, and [`PmbError::WorkdirLocked`]
    /// if another process already holds the lock (unless `wait` is true, in
    /// which case this call blocks until the lock is free).
    pub fn open(root: &Path, wait: bool) -> Result<Self, PmbError> {
        std::fs::create_dir_all(root)?;

        let version = read_version(root)?;
        if version > CURRENT_VERSION {
            return Err(PmbError::WorkdirFromFuture(version));
        }
        apply_migrations(root, version)?;
        write_version(root, CURRENT_VERSION)?;

        let lock_path = root.join("pmbootstrap.lock");
        let lock_file = OpenOptions::new().create(true).read(true).write(true).open(&lock_path)?;

        if wait {
            lock_file.lock_exclusive().map_err(PmbError::Io)?;
        } else if lock_file.try_lock_exclusive().is_err() {
            let holder = read_holder_pid(&lock_file).unwrap_or(0);
            return Err(PmbError::WorkdirLocked(holder));
        }

        let mut file = &lock_file;
        file.set_len(0)?;
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;

        Ok(WorkDir {
            root: root.to_path_buf(),
            lock_file,
        })
    }

    /// Create a fresh work directory with the current version marker, used
    /// by the `init` verb.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or its subdirectories cannot
    /// be created.
    pub fn init(root: &Path) -> Result<Self, PmbError> {
        std::fs::create_dir_all(root)?;
        write_version(root, CURRENT_VERSION)?;
        Self::open(root, false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Read the on-disk version marker and, if the lock is currently held by
/// another process, its pid — without taking the lock itself. Used by the
/// `status` verb so it never blocks on (or contends with) a running build.
pub fn peek(root: &Path) -> Result<(u32, Option<u32>), PmbError> {
    let version = read_version(root)?;
    let lock_path = root.join("pmbootstrap.lock");
    if !lock_path.is_file() {
        return Ok((version, None));
    }
    let file = File::open(&lock_path)?;
    let holder = if file.try_lock_exclusive().is_ok() {
        fs2::FileExt::unlock(&file).ok();
        None
    } else {
        read_holder_pid(&file)
    };
    Ok((version, holder))
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}

fn version_path(root: &Path) -> PathBuf {
    root.join("version")
}

fn read_version(root: &Path) -> Result<u32, PmbError> {
    let path = version_path(root);
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.trim().parse().unwrap_or(0))
}

/// Write the version marker atomically: write to a temp file, then rename.
fn write_version(root: &Path, version: u32) -> Result<(), PmbError> {
    let path = version_path(root);
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, version.to_string())?;
    std::fs::rename(&temp_path, &path)?;
    Ok(())
}

fn apply_migrations(root: &Path, from_version: u32) -> Result<(), PmbError> {
    for migration in migrations() {
        if migration.from_version >= from_version {
            (migration.apply)(root)?;
        }
    }
    Ok(())
}

fn read_holder_pid(file: &File) -> Option<u32> {
    let mut file = file.try_clone().ok()?;
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0)).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_writes_current_version() {
        let dir = tempdir().unwrap();
        let _wd = WorkDir::init(dir.path()).unwrap();
        assert_eq!(read_version(dir.path()).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn reopening_same_dir_without_releasing_lock_fails() {
        let dir = tempdir().unwrap();
        let _held = WorkDir::open(dir.path(), false).unwrap();
        let second = WorkDir::open(dir.path(), false);
        assert!(matches!(second, Err(PmbError::WorkdirLocked(_))));
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _wd = WorkDir::open(dir.path(), false).unwrap();
        }
        let reopened = WorkDir::open(dir.path(), false);
        assert!(reopened.is_ok());
    }

    #[test]
    fn future_version_is_fatal() {
        let dir = tempdir().unwrap();
        write_version(dir.path(), CURRENT_VERSION + 1).unwrap();
        let err = WorkDir::open(dir.path(), false).unwrap_err();
        assert!(matches!(err, PmbError::WorkdirFromFuture(_)));
    }

    #[test]
    fn migration_renames_packages_edge() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("packages").join("edge")).unwrap();
        write_version(dir.path(), 2).unwrap();
        let _wd = WorkDir::open(dir.path(), false).unwrap();
        assert!(dir.path().join("packages").join("master").is_dir());
    }

    #[test]
    fn peek_reports_no_holder_when_unlocked() {
        let dir = tempdir().unwrap();
        let _wd = WorkDir::init(dir.path()).unwrap();
        drop(_wd);
        let (version, holder) = peek(dir.path()).unwrap();
        assert_eq!(version, CURRENT_VERSION);
        assert_eq!(holder, None);
    }

    #[test]
    fn peek_reports_holder_while_locked() {
        let dir = tempdir().unwrap();
        let _held = WorkDir::open(dir.path(), false).unwrap();
        let (_, holder) = peek(dir.path()).unwrap();
        assert_eq!(holder, Some(std::process::id()));
    }
}
