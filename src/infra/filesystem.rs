//! Filesystem operations
//!
//! Handles file and directory operations for build outputs and
//! distribution trees.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a file or a directory with all its contents
pub fn remove_all(path: &Path) -> Result<(), FilesystemError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.map_err(|e| FilesystemError::Remove {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a file, creating parent directories
pub fn write_file(path: &Path, content: &[u8]) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read a file's bytes
pub fn read_file(path: &Path) -> Result<Vec<u8>, FilesystemError> {
    std::fs::read(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Copy one file, creating parent directories and replacing any existing entry
pub fn copy_file(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    if to.is_dir() {
        remove_all(to)?;
    }
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| FilesystemError::Copy {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            error: e.to_string(),
        })
}

/// Copy a file or merge a directory's contents into `to`
///
/// Existing files at the same relative paths are overwritten.
pub fn copy_tree(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    if from.is_file() {
        return copy_file(from, to);
    }

    create_dir_all(to)?;
    for relative in list_files(from)? {
        copy_file(&from.join(&relative), &to.join(&relative))?;
    }
    Ok(())
}

/// Relative paths of every regular file under `root`, sorted
///
/// A missing root yields an empty list; a file root yields its own name.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, FilesystemError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    if root.is_file() {
        return Ok(root
            .file_name()
            .map(|name| vec![PathBuf::from(name)])
            .unwrap_or_default());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| FilesystemError::Walk {
            path: root.to_path_buf(),
            error: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Render a relative path with `/` separators on every platform
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_files_sorted_and_relative() {
        let temp = TempDir::new().unwrap();
        write_file(&temp.path().join("b/z.txt"), b"z").unwrap();
        write_file(&temp.path().join("a.txt"), b"a").unwrap();
        write_file(&temp.path().join("b/c/y.txt"), b"y").unwrap();

        let files: Vec<String> = list_files(temp.path())
            .unwrap()
            .iter()
            .map(|p| to_slash(p))
            .collect();
        assert_eq!(files, vec!["a.txt", "b/c/y.txt", "b/z.txt"]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(list_files(&temp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_copy_tree_merges_and_overwrites() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("from");
        let to = temp.path().join("to");
        write_file(&from.join("x.txt"), b"new").unwrap();
        write_file(&from.join("d/y.txt"), b"y").unwrap();
        write_file(&to.join("x.txt"), b"old").unwrap();
        write_file(&to.join("keep.txt"), b"keep").unwrap();

        copy_tree(&from, &to).unwrap();

        assert_eq!(std::fs::read(to.join("x.txt")).unwrap(), b"new");
        assert_eq!(std::fs::read(to.join("d/y.txt")).unwrap(), b"y");
        assert!(to.join("keep.txt").exists());
    }

    #[test]
    fn test_remove_all_handles_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        let dir = temp.path().join("d");
        write_file(&file, b"").unwrap();
        write_file(&dir.join("inner"), b"").unwrap();

        remove_all(&file).unwrap();
        remove_all(&dir).unwrap();
        remove_all(&temp.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
