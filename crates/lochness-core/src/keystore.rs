//! Secret resolution. Secrets are referenced by `(project_id, key_name)` and
//! only ever live in memory.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;

/// A resolved credential. Its value never shows up in `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeystoreError {
    #[error("no secret named '{key_name}' for project '{project_id}'")]
    NotFound { project_id: String, key_name: String },
    #[error("keystore backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Keystore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, project_id: &str, key_name: &str) -> Result<Secret, KeystoreError>;
}

/// Reads `LOCHNESS_KEY_<PROJECT>_<KEY>` from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvKeystore;

impl EnvKeystore {
    pub fn var_name(project_id: &str, key_name: &str) -> String {
        fn clean(raw: &str) -> String {
            raw.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect()
        }
        format!("LOCHNESS_KEY_{}_{}", clean(project_id), clean(key_name))
    }
}

#[async_trait]
impl Keystore for EnvKeystore {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn resolve(&self, project_id: &str, key_name: &str) -> Result<Secret, KeystoreError> {
        match std::env::var(Self::var_name(project_id, key_name)) {
            Ok(value) if !value.is_empty() => Ok(Secret(value)),
            Ok(_) | Err(std::env::VarError::NotPresent) => Err(KeystoreError::NotFound {
                project_id: project_id.to_string(),
                key_name: key_name.to_string(),
            }),
            Err(err) => Err(KeystoreError::Backend(err.to_string())),
        }
    }
}

/// In-memory table loaded once from a TOML file shaped as
/// `[<project>] <key> = "<secret>"`.
#[derive(Clone, Default)]
pub struct StaticKeystore {
    entries: HashMap<(String, String), Secret>,
}

impl fmt::Debug for StaticKeystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeystore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl StaticKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        project_id: impl Into<String>,
        key_name: impl Into<String>,
        secret: Secret,
    ) {
        self.entries
            .insert((project_id.into(), key_name.into()), secret);
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, KeystoreError> {
        let table: toml::Table =
            toml::from_str(raw).map_err(|e| KeystoreError::Backend(e.to_string()))?;
        let mut store = Self::new();
        for (project, keys) in table {
            let toml::Value::Table(keys) = keys else {
                return Err(KeystoreError::Backend(format!(
                    "project '{project}' must be a table of key = \"secret\" pairs"
                )));
            };
            for (key, value) in keys {
                let toml::Value::String(secret) = value else {
                    return Err(KeystoreError::Backend(format!(
                        "secret '{project}.{key}' must be a string"
                    )));
                };
                store.insert(project.clone(), key, Secret(secret));
            }
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeystoreError::Backend(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Keystore for StaticKeystore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn resolve(&self, project_id: &str, key_name: &str) -> Result<Secret, KeystoreError> {
        self.entries
            .get(&(project_id.to_string(), key_name.to_string()))
            .cloned()
            .ok_or_else(|| KeystoreError::NotFound {
                project_id: project_id.to_string(),
                key_name: key_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn secret_never_prints_its_value() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret}"), "***");
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn env_var_names_are_normalised() {
        assert_eq!(
            EnvKeystore::var_name("prescient", "redcap-main.token"),
            "LOCHNESS_KEY_PRESCIENT_REDCAP_MAIN_TOKEN"
        );
    }

    #[tokio::test]
    #[serial]
    async fn env_keystore_resolves_and_misses() {
        let var = EnvKeystore::var_name("P1", "box");
        std::env::set_var(&var, "s3cr3t");
        let store = EnvKeystore;
        assert_eq!(store.resolve("P1", "box").await.unwrap().expose(), "s3cr3t");
        std::env::remove_var(&var);
        let err = store.resolve("P1", "box").await.unwrap_err();
        assert!(matches!(err, KeystoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn static_keystore_parses_toml_tables() {
        let store = StaticKeystore::from_toml_str(
            r#"
            [PRESCIENT]
            redcap_main = "abc123"
            mindlamp = "xyz"
            "#,
        )
        .unwrap();
        assert_eq!(store.len(), 2);
        let secret = store.resolve("PRESCIENT", "redcap_main").await.unwrap();
        assert_eq!(secret.expose(), "abc123");
        assert!(store.resolve("PRESCIENT", "missing").await.is_err());
    }

    #[test]
    fn static_keystore_rejects_non_string_secrets() {
        let err = StaticKeystore::from_toml_str("[P]\nkey = 3\n").unwrap_err();
        assert!(matches!(err, KeystoreError::Backend(_)));
    }

    #[test]
    fn static_keystore_debug_hides_entries() {
        let mut store = StaticKeystore::new();
        store.insert("P", "k", Secret::new("topsecret"));
        assert!(!format!("{store:?}").contains("topsecret"));
    }
}
