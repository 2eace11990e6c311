//! Atomic TOML file operations.
//!
//! Writes go through a temporary sibling file that is fsynced and renamed
//! over the target, so readers see either the old or the new content. The
//! parent directory is fsynced after every rename or removal so the new
//! directory entry survives power loss.

use continuity_core::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write as IoWrite};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A handle to a TOML file that is replaced atomically on save.
///
/// Provides:
/// - **Atomicity**: Updates are all-or-nothing via tmp file + atomic rename
/// - **Isolation**: [`FileGuard`] serialises read-check-write sequences
/// - **Durability**: Explicit fsync before rename, directory fsync after
#[derive(Debug, Clone)]
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the raw file content.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: Non-empty content
    /// - `Ok(None)`: File doesn't exist or is blank
    pub fn read_text(&self) -> Result<Option<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(content))
    }

    /// Loads the TOML file and deserializes it.
    ///
    /// If the file doesn't exist or is empty, returns `None`.
    pub fn load(&self) -> Result<Option<T>> {
        match self.read_text()? {
            Some(content) => Ok(Some(toml::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Saves data to the TOML file atomically.
    pub fn save(&self, data: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(data)?;

        // Write to temporary file in the same directory
        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(toml_string.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)
    }

    /// Deletes the file. A missing file is not an error.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => sync_parent_dir(&self.path),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Acquires the exclusive guard associated with this file.
    pub fn guard(&self) -> Result<FileGuard> {
        FileGuard::acquire(&sibling(&self.path, ".guard")?)
    }

    fn temp_path(&self) -> Result<PathBuf> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new(""));
        let file_name = self.path.file_name().ok_or_else(|| {
            std::io::Error::new(ErrorKind::InvalidInput, "Path has no file name")
        })?;
        Ok(parent.join(format!(".{}.tmp", file_name.to_string_lossy())))
    }
}

/// Flushes the directory entry of `path` to disk.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

// No directory handle to sync on this platform.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "Path has no file name"))?;
    Ok(path.with_file_name(format!("{}{}", file_name.to_string_lossy(), suffix)))
}

/// An exclusive advisory lock on a guard file, released when dropped.
///
/// The guard file itself is left in place: deleting it while another
/// process waits on the old inode would let two holders coexist.
#[derive(Debug)]
pub struct FileGuard {
    file: File,
    path: PathBuf,
}

impl FileGuard {
    /// Blocks until the exclusive lock on `path` is acquired.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        fs2::FileExt::lock_exclusive(&file)?;

        Ok(FileGuard {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release guard {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(temp_dir.path().join("counter.toml"));

        file.save(&Counter {
            name: "ticks".to_string(),
            count: 42,
        })
        .unwrap();

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded.count, 42);
        assert!(!temp_dir.path().join(".counter.toml.tmp").exists());
    }

    #[test]
    fn test_missing_and_blank_files_load_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("counter.toml");
        let file = AtomicTomlFile::<Counter>::new(path.clone());
        assert!(file.load().unwrap().is_none());

        fs::write(&path, "  \n").unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_malformed_file_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("counter.toml");
        fs::write(&path, "name = ").unwrap();
        let err = AtomicTomlFile::<Counter>::new(path).load().unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn test_guard_is_exclusive_and_kept_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(temp_dir.path().join("counter.toml"));
        let guard_path = temp_dir.path().join("counter.toml.guard");

        let guard = file.guard().unwrap();
        assert_eq!(guard.path(), guard_path.as_path());

        let contender = OpenOptions::new().write(true).open(&guard_path).unwrap();
        assert!(fs2::FileExt::try_lock_exclusive(&contender).is_err());

        drop(guard);
        assert!(fs2::FileExt::try_lock_exclusive(&contender).is_ok());
        assert!(guard_path.exists());
    }

    #[test]
    fn test_save_and_remove_sync_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("state");
        let file = AtomicTomlFile::<Counter>::new(nested.join("counter.toml"));
        file.save(&Counter {
            name: "a".to_string(),
            count: 1,
        })
        .unwrap();
        file.save(&Counter {
            name: "a".to_string(),
            count: 2,
        })
        .unwrap();
        assert_eq!(file.load().unwrap().unwrap().count, 2);

        sync_parent_dir(file.path()).unwrap();
        sync_parent_dir(Path::new("bare-name.toml")).unwrap();
        file.remove().unwrap();
        assert!(!nested.join("counter.toml").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Counter>::new(temp_dir.path().join("counter.toml"));
        file.remove().unwrap();
        file.save(&Counter {
            name: "x".to_string(),
            count: 1,
        })
        .unwrap();
        file.remove().unwrap();
        assert!(file.load().unwrap().is_none());
    }
}
