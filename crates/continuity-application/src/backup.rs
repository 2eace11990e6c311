//! Naming and rotation of timestamped database backups.

use chrono::{DateTime, Utc};
use continuity_core::Result;
use std::fs;
use std::path::{Path, PathBuf};

const PREFIX: &str = "continuity-";
const EXTENSION: &str = ".db";

/// File name of a backup taken at `now`. Names sort chronologically.
pub fn backup_file_name(now: DateTime<Utc>) -> String {
    format!("{}{}{}", PREFIX, now.format("%Y%m%dT%H%M%S%.6fZ"), EXTENSION)
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with(PREFIX) && name.ends_with(EXTENSION)
}

/// Removes the oldest backups in `dir` so that at most `keep` remain.
///
/// Only files named like [`backup_file_name`] are considered. Returns the
/// removed paths.
pub fn rotate_backups(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(is_backup_name) {
            backups.push(entry.path());
        }
    }
    backups.sort();

    let excess = backups.len().saturating_sub(keep);
    let removed: Vec<PathBuf> = backups.into_iter().take(excess).collect();
    for path in &removed {
        fs::remove_file(path)?;
        tracing::debug!("Rotated out backup {:?}", path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_backup_file_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(backup_file_name(at), "continuity-20240309T070501.000000Z.db");
    }

    #[test]
    fn test_rotate_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for minute in 0..4 {
            let name = backup_file_name(base + chrono::Duration::minutes(minute));
            fs::write(temp.path().join(name), b"db").unwrap();
        }
        fs::write(temp.path().join("notes.txt"), b"keep me").unwrap();

        let removed = rotate_backups(temp.path(), 2).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed[0].ends_with(backup_file_name(base)));

        let mut left: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                backup_file_name(base + chrono::Duration::minutes(2)),
                backup_file_name(base + chrono::Duration::minutes(3)),
                "notes.txt".to_string(),
            ]
        );
    }

    #[test]
    fn test_rotate_with_room_removes_nothing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(backup_file_name(Utc::now())), b"db").unwrap();
        assert!(rotate_backups(temp.path(), 5).unwrap().is_empty());
    }
}
