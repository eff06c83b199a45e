//! Filename bookkeeping for archives under construction.
//!
//! An archive where `a/b` is both a file and a directory extracts
//! differently depending on the unarchiver, and two entries with the same
//! name shadow each other. The [`PathSet`] keeps the set of directory and
//! file paths added so far and rejects additions that would create such
//! conflicts before any bytes hit the sink.

use std::collections::HashSet;

use crate::error::WriteError;

/// Tracks every directory and file path added to an archive.
///
/// Invariants maintained:
/// - every ancestor of a known path is in the directory set;
/// - the directory set and the file set are disjoint.
#[derive(Debug, Default)]
pub struct PathSet {
    known_directories: HashSet<String>,
    known_files: HashSet<String>,
}

/// Split a path on `/`, discarding empty components.
///
/// This collapses leading and duplicated separators, so `"//a///b"` and
/// `"a/b"` decompose identically.
fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Ancestor paths of `path` in order: `a`, `a/b`, `a/b/c`, … excluding the
/// path itself.
fn ancestors(path: &str) -> Vec<String> {
    let parts = components(path);
    (1..parts.len()).map(|i| parts[..i].join("/")).collect()
}

/// The path normalized to single separators with no leading or trailing
/// slash.
fn normalize(path: &str) -> String {
    components(path).join("/")
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` as a directory, together with all its ancestors.
    pub fn add_directory_path(&mut self, path: &str) -> Result<(), WriteError> {
        let normalized = normalize(path);
        if self.known_files.contains(&normalized) {
            return Err(WriteError::FileClobbersDirectory(normalized));
        }
        for ancestor in ancestors(&normalized) {
            if self.known_files.contains(&ancestor) {
                return Err(WriteError::FileClobbersDirectory(ancestor));
            }
        }
        for ancestor in ancestors(&normalized) {
            self.known_directories.insert(ancestor);
        }
        if !normalized.is_empty() {
            self.known_directories.insert(normalized);
        }
        Ok(())
    }

    /// Register `path` as a file, together with all its ancestor
    /// directories.
    pub fn add_file_path(&mut self, path: &str) -> Result<(), WriteError> {
        let normalized = normalize(path);
        if self.known_directories.contains(&normalized) {
            return Err(WriteError::DirectoryClobbersFile(normalized));
        }
        if self.known_files.contains(&normalized) {
            return Err(WriteError::DuplicatePath(normalized));
        }
        for ancestor in ancestors(&normalized) {
            // The file's ancestors become directories, so an existing file
            // at any of them is the same clash as in add_directory_path.
            if self.known_files.contains(&ancestor) {
                return Err(WriteError::FileClobbersDirectory(ancestor));
            }
        }
        for ancestor in ancestors(&normalized) {
            self.known_directories.insert(ancestor);
        }
        self.known_files.insert(normalized);
        Ok(())
    }

    /// Whether `path` is already known, as either a file or a directory.
    pub fn contains(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.known_files.contains(&normalized) || self.known_directories.contains(&normalized)
    }

    pub fn clear(&mut self) {
        self.known_directories.clear();
        self.known_files.clear();
    }

    /// Derive an unused name from `path` by appending ` (1)`, ` (2)`, …
    /// before the last dot-extension of the final segment.
    ///
    /// Returns `path` unchanged when it is not taken yet.
    pub fn uniquify(&self, path: &str) -> String {
        if !self.contains(path) {
            return path.to_string();
        }
        let (stem, ext) = split_extension(path);
        for n in 1u64.. {
            let candidate = format!("{stem} ({n}){ext}");
            if !self.contains(&candidate) {
                return candidate;
            }
        }
        unreachable!("u64 counter exhausted");
    }
}

/// Split `path` into (everything before the final segment's extension, the
/// extension including its dot). A dot that starts the final segment does
/// not count as an extension.
fn split_extension(path: &str) -> (&str, &str) {
    let segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let segment = &path[segment_start..];
    match segment.rfind('.') {
        Some(dot) if dot > 0 => path.split_at(segment_start + dot),
        _ => (path, ""),
    }
}
