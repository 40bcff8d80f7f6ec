//! Debug copies of rewritten classes
//!
//! `com/example/Foo` lands at `<root>/com/example/Foo.class`, so the dump
//! directory can be fed straight to `javap` or a decompiler.

use log::{debug, warn};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ClassDumper {
    root: PathBuf,
}

impl ClassDumper {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path for an internal class name
    pub fn path_for(&self, internal_name: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(internal_name.split('/'));
        path.set_extension("class");
        path
    }

    /// Write `bytes` under the class's package path
    ///
    /// Best-effort: I/O failures are logged and otherwise ignored.
    pub fn dump(&self, internal_name: &str, bytes: &[u8]) {
        let path = self.path_for(internal_name);
        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&path, bytes));
        match result {
            Ok(()) => debug!("Dumped {internal_name} to {}", path.display()),
            Err(e) => warn!("Could not dump {internal_name} to {}: {e}", path.display()),
        }
    }
}
