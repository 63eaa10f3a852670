//! Deterministic chaincode packages
//!
//! A package is a flat archive of every non-hidden file under the source
//! directory, ordered by relative path. Each entry is
//! `u32 path length | path | u64 content length | content` (big-endian), so
//! the same tree always yields the same bytes and the same digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{LifecycleError, Result};

/// A built chaincode package, installable on any number of peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodePackage {
    pub name: String,
    /// Source path label (the source directory name)
    pub path: String,
    pub version: String,
    /// Hex sha256 of `archive`
    pub digest: String,
    #[serde(with = "crate::types::base64_bytes")]
    pub archive: Vec<u8>,
}

impl ChaincodePackage {
    /// Build a package from `source_path`.
    pub fn build(name: &str, source_path: &Path, version: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(LifecycleError::Package(
                "chaincode name must not be empty".to_string(),
            ));
        }
        if version.trim().is_empty() {
            return Err(LifecycleError::Package(format!(
                "chaincode {name} has an empty version"
            )));
        }
        if !source_path.is_dir() {
            return Err(LifecycleError::Package(format!(
                "chaincode source {} is not a directory",
                source_path.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(source_path, source_path, &mut files)?;
        if files.is_empty() {
            return Err(LifecycleError::Package(format!(
                "chaincode source {} contains no files",
                source_path.display()
            )));
        }
        files.sort();

        let mut archive = Vec::new();
        for relative in &files {
            let content = fs::read(source_path.join(relative)).map_err(|e| {
                LifecycleError::Package(format!("cannot read {}: {}", relative.display(), e))
            })?;
            let entry_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            archive.extend_from_slice(&(entry_name.len() as u32).to_be_bytes());
            archive.extend_from_slice(entry_name.as_bytes());
            archive.extend_from_slice(&(content.len() as u64).to_be_bytes());
            archive.extend_from_slice(&content);
        }

        let digest = hex::encode(Sha256::digest(&archive));
        let path = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        Ok(Self {
            name: name.to_string(),
            path,
            version: version.to_string(),
            digest,
            archive,
        })
    }

    /// [`build`](Self::build) on the blocking pool, off the async runtime.
    pub async fn build_async(name: &str, source_path: &Path, version: &str) -> Result<Self> {
        let (name, source_path, version) =
            (name.to_string(), source_path.to_path_buf(), version.to_string());
        tokio::task::spawn_blocking(move || Self::build(&name, &source_path, &version))
            .await
            .map_err(|e| LifecycleError::Package(format!("packaging task failed: {e}")))?
    }

    /// The same package content under a different version label.
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..self.clone()
        }
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        LifecycleError::Package(format!("cannot list {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|e| LifecycleError::Package(format!("cannot list {}: {}", dir.display(), e)))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if path.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| LifecycleError::Package(e.to_string()))?;
            files.push(relative.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("main.go"), "package main").unwrap();
        fs::write(dir.path().join("lib/ledger.go"), "package lib").unwrap();
        fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        dir
    }

    #[test]
    fn test_build_is_deterministic() {
        let dir = source_tree();
        let a = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();
        let b = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();

        assert_eq!(a.archive, b.archive);
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
        assert!(!a.archive.windows(9).any(|w| w == b".DS_Store"));
    }

    #[test]
    fn test_content_change_changes_digest() {
        let dir = source_tree();
        let before = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();
        fs::write(dir.path().join("main.go"), "package main // v2").unwrap();
        let after = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();

        assert_ne!(before.digest, after.digest);
    }

    #[test]
    fn test_missing_or_empty_source_is_package_error() {
        let missing = ChaincodePackage::build("exampleCC", Path::new("/nonexistent/cc"), "0");
        assert!(matches!(missing, Err(LifecycleError::Package(_))));

        let empty = tempfile::tempdir().unwrap();
        let result = ChaincodePackage::build("exampleCC", empty.path(), "0");
        assert!(matches!(result, Err(LifecycleError::Package(_))));
    }

    #[tokio::test]
    async fn test_build_async_matches_blocking_build() {
        let dir = source_tree();
        let blocking = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();
        let off_runtime = ChaincodePackage::build_async("exampleCC", dir.path(), "0")
            .await
            .unwrap();
        assert_eq!(blocking, off_runtime);

        let missing =
            ChaincodePackage::build_async("exampleCC", Path::new("/nonexistent/cc"), "0").await;
        assert!(matches!(missing, Err(LifecycleError::Package(_))));
    }

    #[test]
    fn test_with_version_keeps_content() {
        let dir = source_tree();
        let v0 = ChaincodePackage::build("exampleCC", dir.path(), "0").unwrap();
        let v1 = v0.with_version("1");
        assert_eq!(v1.version, "1");
        assert_eq!(v1.digest, v0.digest);
    }
}
