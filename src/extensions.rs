//! Installed-extension discovery.
//!
//! Extensions are directories under `~/.lightspeed/extensions/<id>/`, each
//! with an `extension.json` manifest at its root. Presence of the manifest is
//! the installation signal; listing is fail-open (unreadable manifests are
//! skipped, never fatal).

use crate::error::{Error, Result};
use crate::session::ExtensionRegistry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extension that owns the Red Hat account authentication provider.
pub const REDHAT_ACCOUNT_EXTENSION: &str = "redhat.account-auth";

/// Base Ansible extension the whoami flow requires.
pub const ANSIBLE_EXTENSION: &str = "redhat.ansible";

const MANIFEST_FILE: &str = "extension.json";

/// Manifest at the root of an installed extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Directory-backed extension registry.
#[derive(Debug, Clone)]
pub struct ExtensionDir {
    root: PathBuf,
}

impl ExtensionDir {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default location of the extensions directory.
    pub fn default_root() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".lightspeed").join("extensions"))
            .ok_or_else(|| Error::config("Could not determine home directory"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifests of everything installed, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<ExtensionManifest> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let manifest_path = entry.path().join(MANIFEST_FILE);
            let Ok(raw) = fs::read_to_string(&manifest_path) else {
                continue;
            };
            match serde_json::from_str::<ExtensionManifest>(&raw) {
                Ok(manifest) => found.push(manifest),
                Err(err) => {
                    warn!(path = %manifest_path.display(), %err, "skipping unreadable extension manifest");
                }
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

impl ExtensionRegistry for ExtensionDir {
    fn is_installed(&self, extension_id: &str) -> bool {
        self.root.join(extension_id).join(MANIFEST_FILE).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn install(root: &Path, id: &str, manifest: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(MANIFEST_FILE), manifest).expect("write manifest");
    }

    #[test]
    fn missing_root_is_not_installed() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let registry = ExtensionDir::new(dir.path().join("extensions"));
        assert!(!registry.is_installed(REDHAT_ACCOUNT_EXTENSION));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn manifest_presence_marks_installed() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let registry = ExtensionDir::new(dir.path().to_path_buf());
        install(
            dir.path(),
            REDHAT_ACCOUNT_EXTENSION,
            r#"{"id":"redhat.account-auth","name":"Red Hat Account","version":"1.0.0"}"#,
        );

        assert!(registry.is_installed(REDHAT_ACCOUNT_EXTENSION));
        assert!(!registry.is_installed(ANSIBLE_EXTENSION));
    }

    #[test]
    fn directory_without_manifest_is_not_installed() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let registry = ExtensionDir::new(dir.path().to_path_buf());
        fs::create_dir_all(dir.path().join(ANSIBLE_EXTENSION)).expect("mkdir");

        assert!(!registry.is_installed(ANSIBLE_EXTENSION));
    }

    #[test]
    fn list_is_sorted_and_skips_bad_manifests() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let registry = ExtensionDir::new(dir.path().to_path_buf());
        install(dir.path(), ANSIBLE_EXTENSION, r#"{"id":"redhat.ansible"}"#);
        install(
            dir.path(),
            REDHAT_ACCOUNT_EXTENSION,
            r#"{"id":"redhat.account-auth"}"#,
        );
        install(dir.path(), "broken.extension", "not json");

        let ids: Vec<String> = registry.list().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["redhat.account-auth", "redhat.ansible"]);
    }
}
