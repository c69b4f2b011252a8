//! Directory traversal for the remote clone and the save folder.
//!
//! The remote side needs two things from the filesystem: the total size of
//! the local clone (including `.git`, which is where history accumulates)
//! and the list of regular files sitting directly in the save folder.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Maximum depth (None = unlimited)
    pub max_depth: Option<usize>,
}

impl WalkOptions {
    /// Only the direct children of the root
    pub fn top_level() -> Self {
        Self { max_depth: Some(1) }
    }
}

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    /// Symlinks are resolved to their target; links to directories and broken
    /// links yield `None`.
    fn from_entry(entry: &DirEntry) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();

        let size = if raw_metadata.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                _ => return Ok(None),
            }
        } else {
            raw_metadata.len()
        };

        Ok(Some(Self { path, size }))
    }
}

/// Walk a directory tree with a callback for each regular file
pub fn walk_directory_with_callback<F>(
    root: &Path,
    options: &WalkOptions,
    mut callback: F,
) -> std::io::Result<()>
where
    F: FnMut(&FileInfo),
{
    let mut walker = WalkDir::new(root);

    if let Some(max_depth) = options.max_depth {
        walker = walker.max_depth(max_depth);
    }

    for entry in walker {
        let entry = entry?;

        if entry.file_type().is_dir() {
            continue;
        }

        if let Some(file_info) = FileInfo::from_entry(&entry)? {
            callback(&file_info);
        }
    }

    Ok(())
}

/// Collect every regular file under `root`
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, options, |file| files.push(file.clone()))?;
    Ok(files)
}

/// Total size of all files under `root`. A missing root counts as empty.
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    if !root.exists() {
        return Ok(0);
    }

    let mut total_size = 0u64;
    walk_directory_with_callback(root, &WalkOptions::default(), |file| {
        total_size += file.size;
    })?;

    Ok(total_size)
}

/// Regular files directly inside `dir`, sorted by path
pub fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = walk_directory(dir, &WalkOptions::top_level())?
        .into_iter()
        .map(|f| f.path)
        .collect();
    files.sort();
    Ok(files)
}
