use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::StorageError;

/// Move a file from `src` to `dst`, replacing `dst`. Uses `rename` first and
/// falls back to copy + delete for cross-device moves.
pub fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    ensure_parent(dst)?;

    // Fast path: atomic rename
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Outcome of a successful [`move_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeMove {
    /// Files moved; zero when the source did not exist.
    pub files: usize,
    /// Whether the destination already existed and was merged into.
    pub merged: bool,
}

/// Moves the directory `from` to `to`, merging into any existing content.
///
/// Files already present at the destination are overwritten. The source is
/// removed only after every file has been moved; otherwise the remaining
/// files stay in place and `PartialMove` is returned so a later pass can
/// finish the job.
pub fn move_tree(from: &Path, to: &Path) -> Result<TreeMove, StorageError> {
    if !from.exists() {
        return Ok(TreeMove::default());
    }

    if !to.exists() {
        ensure_parent(to)?;
        if std::fs::rename(from, to).is_ok() {
            let files = count_files(to)?;
            return Ok(TreeMove {
                files,
                merged: false,
            });
        }
    }

    let files = collect_files(from)?;
    let total = files.len();
    let mut failed = 0;

    for src in &files {
        let Ok(relative) = src.strip_prefix(from) else {
            failed += 1;
            continue;
        };
        let dst = to.join(relative);
        if let Err(e) = move_file(src, &dst) {
            log::warn!("{}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(StorageError::PartialMove {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            failed,
            total,
        });
    }

    std::fs::remove_dir_all(from).map_err(|e| StorageError::Remove {
        path: from.to_path_buf(),
        source: e,
    })?;

    Ok(TreeMove {
        files: total,
        merged: true,
    })
}

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) => ensure_directory(parent),
        None => Ok(()),
    }
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| StorageError::Walk {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn count_files(dir: &Path) -> Result<usize, StorageError> {
    collect_files(dir).map(|files| files.len())
}
