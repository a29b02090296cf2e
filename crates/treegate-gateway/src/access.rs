//! Repository access configuration: repositories, key IDs, secrets.
//!
//! Loaded once at startup from a JSON file:
//!
//! ```json
//! {
//!   "repos": [
//!     { "name": "software.example.org", "keys": ["publisher1"] }
//!   ],
//!   "keys": [
//!     { "id": "publisher1", "secret": "..." }
//!   ]
//! }
//! ```
//!
//! The loaded table answers [`SecretLookup`] for request authorization and
//! backs the read-only `/repos` introspection endpoints. It is immutable at
//! request time; operators restart the gateway to rotate keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use treegate_core::signature::SecretLookup;

/// Errors loading the access configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The access configuration path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The access configuration path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Two key entries share the same ID.
    #[error("duplicate key id {key_id:?}")]
    DuplicateKey {
        /// The duplicated key ID.
        key_id: String,
    },

    /// A repository references a key that has no entry.
    #[error("repository {repo:?} references unknown key {key_id:?}")]
    UnknownKeyRef {
        /// The repository name.
        repo: String,
        /// The missing key ID.
        key_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawKey {
    id: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    repos: Vec<RepoSpec>,
    #[serde(default)]
    keys: Vec<RawKey>,
}

/// One repository and the key IDs allowed to publish into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSpec {
    /// Fully qualified repository name.
    pub name: String,
    /// Key IDs authorized for this repository.
    pub keys: Vec<String>,
}

/// The loaded access table.
pub struct AccessConfig {
    repos: Vec<RepoSpec>,
    keys: HashMap<String, SecretString>,
}

impl AccessConfig {
    /// Loads and validates the access configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`AccessConfigError`] on I/O or parse failure, duplicate key
    /// IDs, or repositories referencing undeclared keys.
    pub fn load(path: &Path) -> Result<Self, AccessConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AccessConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: RawFile =
            serde_json::from_str(&raw).map_err(|source| AccessConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut keys = HashMap::with_capacity(parsed.keys.len());
        for key in parsed.keys {
            if keys
                .insert(key.id.clone(), SecretString::from(key.secret))
                .is_some()
            {
                return Err(AccessConfigError::DuplicateKey { key_id: key.id });
            }
        }
        for repo in &parsed.repos {
            for key_id in &repo.keys {
                if !keys.contains_key(key_id) {
                    return Err(AccessConfigError::UnknownKeyRef {
                        repo: repo.name.clone(),
                        key_id: key_id.clone(),
                    });
                }
            }
        }

        tracing::info!(
            repos = parsed.repos.len(),
            keys = keys.len(),
            "access configuration loaded"
        );
        Ok(Self {
            repos: parsed.repos,
            keys,
        })
    }

    /// Builds a table directly; used by tests.
    #[must_use]
    pub fn from_parts(repos: Vec<RepoSpec>, keys: HashMap<String, SecretString>) -> Self {
        Self { repos, keys }
    }

    /// All configured repositories.
    #[must_use]
    pub fn repos(&self) -> &[RepoSpec] {
        &self.repos
    }

    /// Looks up one repository by name.
    #[must_use]
    pub fn repo(&self, name: &str) -> Option<&RepoSpec> {
        self.repos.iter().find(|r| r.name == name)
    }
}

impl SecretLookup for AccessConfig {
    fn secret(&self, key_id: &str) -> Option<SecretString> {
        self.keys.get(key_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use secrecy::ExposeSecret;

    use super::*;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn loads_repos_and_keys() {
        let file = write_file(
            r#"{
                "repos": [
                    {"name": "software.example.org", "keys": ["k1", "k2"]}
                ],
                "keys": [
                    {"id": "k1", "secret": "s1"},
                    {"id": "k2", "secret": "s2"}
                ]
            }"#,
        );

        let access = AccessConfig::load(file.path()).unwrap();
        assert_eq!(access.repos().len(), 1);
        assert_eq!(access.repo("software.example.org").unwrap().keys.len(), 2);
        assert!(access.repo("other.example.org").is_none());
        assert_eq!(access.secret("k1").unwrap().expose_secret(), "s1");
        assert!(access.secret("k3").is_none());
    }

    #[test]
    fn rejects_duplicate_key_ids() {
        let file = write_file(
            r#"{"keys": [{"id": "k1", "secret": "a"}, {"id": "k1", "secret": "b"}]}"#,
        );
        assert!(matches!(
            AccessConfig::load(file.path()),
            Err(AccessConfigError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn rejects_dangling_key_references() {
        let file = write_file(
            r#"{"repos": [{"name": "r", "keys": ["ghost"]}], "keys": []}"#,
        );
        assert!(matches!(
            AccessConfig::load(file.path()),
            Err(AccessConfigError::UnknownKeyRef { .. })
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        let file = write_file("{not json");
        assert!(matches!(
            AccessConfig::load(file.path()),
            Err(AccessConfigError::Parse { .. })
        ));
    }
}
