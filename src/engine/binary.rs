//! Tool discovery
//!
//! Looks up analysis tools in the working copy root, then the project's
//! vendor binary directory, then the executor's search path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::engine::command::CommandExecutor;

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    root: PathBuf,
    vendor_bin: PathBuf,
    search_path: OsString,
}

impl BinaryLocator {
    /// `vendor_bin_dir` is resolved against `root` when relative
    pub fn new(root: &Path, vendor_bin_dir: &Path, executor: &CommandExecutor) -> Self {
        Self {
            root: root.to_path_buf(),
            vendor_bin: root.join(vendor_bin_dir),
            search_path: executor.search_path(),
        }
    }

    /// First candidate found, in list order
    pub fn find_binary<S: AsRef<str>>(&self, names: &[S]) -> Option<PathBuf> {
        names.iter().find_map(|name| self.find(name.as_ref()))
    }

    /// Resolve a single name
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        for dir in [&self.root, &self.vendor_bin] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        which::which_in(name, Some(&self.search_path), &self.root).ok()
    }
}
