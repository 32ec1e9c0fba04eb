//! Where documents come from.
//!
//! The merge engine never touches the file system directly; it asks a
//! [`DocumentSource`] for the text of a resolved path. [`FileSystemSource`]
//! reads real files, [`MemorySource`] serves bundled or test documents.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

pub trait DocumentSource {
    /// Read the document at an already-resolved path.
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads documents from disk.
#[derive(Debug, Clone, Default)]
pub struct FileSystemSource;

impl DocumentSource for FileSystemSource {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Documents held in memory, keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: HashMap<PathBuf, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl AsRef<Path>, content: impl Into<String>) -> &mut Self {
        self.documents.insert(normalize(path.as_ref()), content.into());
        self
    }
}

impl DocumentSource for MemorySource {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.documents
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no document at {}", path.display())))
    }
}

/// Resolve `reference` against the directory of the document `base`.
///
/// Absolute references are used as-is.
pub fn resolve_relative(reference: &str, base: Option<&Path>) -> PathBuf {
    let reference = Path::new(reference);
    if reference.is_absolute() {
        return normalize(reference);
    }
    let dir = base.and_then(Path::parent).unwrap_or_else(|| Path::new(""));
    normalize(&dir.join(reference))
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_))) && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            resolve_relative("parts/db.yml", Some(Path::new("/srv/app/main.yml"))),
            PathBuf::from("/srv/app/parts/db.yml")
        );
        assert_eq!(
            resolve_relative("../shared.yml", Some(Path::new("/srv/app/main.yml"))),
            PathBuf::from("/srv/shared.yml")
        );
        assert_eq!(
            resolve_relative("/etc/x.yml", Some(Path::new("/srv/app/main.yml"))),
            PathBuf::from("/etc/x.yml")
        );
        assert_eq!(resolve_relative("./x.yml", None), PathBuf::from("x.yml"));
    }

    #[test]
    fn test_normalize_keeps_leading_parent() {
        assert_eq!(normalize(Path::new("../a/./b/../c")), PathBuf::from("../a/c"));
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::new();
        source.add("conf/base.yml", "a: 1");
        assert_eq!(source.read(Path::new("conf/./base.yml")).unwrap(), "a: 1");
        let err = source.read(Path::new("conf/missing.yml")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_file_system_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.yml");
        std::fs::write(&file, "x: 1").unwrap();
        assert_eq!(FileSystemSource.read(&file).unwrap(), "x: 1");
        assert!(FileSystemSource.read(&dir.path().join("nope.yml")).is_err());
    }
}
