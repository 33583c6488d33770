//! Persisted settings document and its compiled-in defaults.
//!
//! The document lives at `<config dir>/groups/nekobox.json`. Reads overlay
//! the stored values on [`default_document`] key by key, so a partially
//! written file never hides a setting the service relies on.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::Builder;
use thiserror::Error;
use tracing::{debug, info};

const STORE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::store");

/// Flat key/value settings document.
pub type ConfigDocument = Map<String, Value>;

/// File name of the settings document inside [`GROUPS_DIR`].
pub const SETTINGS_FILE: &str = "nekobox.json";
/// Directory reserved for profile storage.
pub const PROFILES_DIR: &str = "profiles";
/// Directory holding group data and the settings document.
pub const GROUPS_DIR: &str = "groups";
/// Directory reserved for routing rule sets.
pub const ROUTES_DIR: &str = "routes";

/// Keys read by the service layer.
pub mod keys {
    /// Address the core's inbound listeners bind to.
    pub const INBOUND_ADDRESS: &str = "inbound_address";
    /// SOCKS listener port.
    pub const INBOUND_SOCKS_PORT: &str = "inbound_socks_port";
    /// HTTP listener port.
    pub const INBOUND_HTTP_PORT: &str = "inbound_http_port";
    /// Whether system-wide VPN mode is requested.
    pub const SPMODE_VPN: &str = "spmode_vpn";
    /// Whether VPN mode should use the built-in TUN process.
    pub const VPN_INTERNAL_TUN: &str = "vpn_internal_tun";
}

/// Default inbound listen address.
pub const DEFAULT_INBOUND_ADDRESS: &str = "127.0.0.1";
/// Default SOCKS listener port.
pub const DEFAULT_SOCKS_PORT: u16 = 2080;
/// Default HTTP listener port.
pub const DEFAULT_HTTP_PORT: u16 = 2081;

/// Builds the complete default settings document.
#[must_use]
pub fn default_document() -> ConfigDocument {
    let mut document = ConfigDocument::new();
    document.insert(keys::INBOUND_ADDRESS.to_owned(), Value::from(DEFAULT_INBOUND_ADDRESS));
    document.insert(keys::INBOUND_SOCKS_PORT.to_owned(), Value::from(DEFAULT_SOCKS_PORT));
    document.insert(keys::INBOUND_HTTP_PORT.to_owned(), Value::from(DEFAULT_HTTP_PORT));
    document.insert(keys::SPMODE_VPN.to_owned(), Value::Bool(false));
    document.insert(keys::VPN_INTERNAL_TUN.to_owned(), Value::Bool(true));
    document
}

/// Overlays `current` on `defaults`; stored values always win.
#[must_use]
pub fn merge_with_defaults(current: &ConfigDocument, defaults: &ConfigDocument) -> ConfigDocument {
    let mut merged = current.clone();
    for (key, value) in defaults {
        if !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Reads a settings document from an arbitrary path.
pub fn read_document(path: &Path) -> Result<ConfigDocument, StoreError> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(path, &contents)
}

fn parse_document(path: &Path, contents: &str) -> Result<ConfigDocument, StoreError> {
    match serde_json::from_str::<Value>(contents) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(StoreError::NotAnObject {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(StoreError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Errors raised while reading or writing the settings document.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A directory could not be created.
    #[error("failed to create directory '{path}': {source}")]
    Directory {
        /// Directory being created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The document could not be read.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The document is not valid JSON.
    #[error("malformed JSON in '{path}': {source}")]
    Parse {
        /// Document path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The document parsed but its root is not an object.
    #[error("'{path}' does not contain a JSON object")]
    NotAnObject {
        /// Document path.
        path: PathBuf,
    },
    /// Serialising or writing the document failed.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Whether the failure stems from malformed content rather than IO.
    #[must_use]
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::NotAnObject { .. })
    }
}

/// Owns the on-disk settings document for one configuration directory.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    document: ConfigDocument,
}

impl ConfigStore {
    /// Prepares the store, creating `dir` and its `groups` folder.
    pub fn initialize(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let groups = dir.join(GROUPS_DIR);
        fs::create_dir_all(&groups).map_err(|source| StoreError::Directory {
            path: groups.clone(),
            source,
        })?;
        Ok(Self {
            path: groups.join(SETTINGS_FILE),
            dir,
            document: ConfigDocument::new(),
        })
    }

    /// Loads the backing file, creating an empty one when absent.
    ///
    /// A parse failure leaves the in-memory document untouched.
    pub fn load(&mut self) -> Result<&ConfigDocument, StoreError> {
        if !self.path.exists() {
            info!(
                target: STORE_TARGET,
                file = %self.path.display(),
                "settings file absent; creating empty document"
            );
            self.document = ConfigDocument::new();
            self.save()?;
            return Ok(&self.document);
        }

        let document = read_document(&self.path)?;
        debug!(
            target: STORE_TARGET,
            file = %self.path.display(),
            keys = document.len(),
            "settings loaded"
        );
        self.document = document;
        Ok(&self.document)
    }

    /// Writes the in-memory document over the backing file.
    pub fn save(&self) -> Result<(), StoreError> {
        let mut payload =
            serde_json::to_vec_pretty(&self.document).map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source: io::Error::other(source),
            })?;
        payload.push(b'\n');
        atomic_write(&self.path, &payload).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(target: STORE_TARGET, file = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Current in-memory document.
    #[must_use]
    pub const fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// Replaces the in-memory document without persisting it.
    pub fn replace(&mut self, document: ConfigDocument) {
        self.document = document;
    }

    /// Configuration directory backing this store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the settings document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "settings path did not have a parent directory",
        )
    })?;

    let mut file = Builder::new().prefix(SETTINGS_FILE).tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    #[rstest]
    fn load_creates_missing_file(temp_dir: TempDir) {
        let mut store = ConfigStore::initialize(temp_dir.path()).expect("initialise store");
        let document = store.load().expect("load store").clone();

        assert!(document.is_empty());
        assert!(store.path().exists(), "settings file should be created");
        assert!(store.path().ends_with("groups/nekobox.json"));
    }

    #[rstest]
    fn save_then_load_preserves_values(temp_dir: TempDir) {
        let mut store = ConfigStore::initialize(temp_dir.path()).expect("initialise store");
        let mut document = ConfigDocument::new();
        document.insert("inbound_socks_port".to_owned(), json!(3080));
        store.replace(document.clone());
        store.save().expect("save store");

        let mut reopened = ConfigStore::initialize(temp_dir.path()).expect("reopen store");
        assert_eq!(reopened.load().expect("load store"), &document);
    }

    #[rstest]
    fn malformed_file_keeps_previous_document(temp_dir: TempDir) {
        let mut store = ConfigStore::initialize(temp_dir.path()).expect("initialise store");
        let mut document = ConfigDocument::new();
        document.insert("spmode_vpn".to_owned(), json!(true));
        store.replace(document.clone());
        fs::write(store.path(), "{ not json").expect("write malformed file");

        let error = store.load().expect_err("malformed JSON should fail");

        assert!(error.is_parse_error());
        assert_eq!(store.document(), &document);
    }

    #[rstest]
    fn non_object_root_is_a_parse_error(temp_dir: TempDir) {
        let path = temp_dir.path().join("list.json");
        fs::write(&path, "[1, 2, 3]").expect("write file");
        let error = read_document(&path).expect_err("array root should fail");
        assert!(matches!(error, StoreError::NotAnObject { .. }));
    }

    #[test]
    fn merge_keeps_stored_values_and_fills_gaps() {
        let mut current = ConfigDocument::new();
        current.insert(keys::INBOUND_SOCKS_PORT.to_owned(), json!(1080));
        current.insert("custom".to_owned(), json!("kept"));

        let merged = merge_with_defaults(&current, &default_document());

        assert_eq!(merged.get(keys::INBOUND_SOCKS_PORT), Some(&json!(1080)));
        assert_eq!(merged.get(keys::INBOUND_HTTP_PORT), Some(&json!(2081)));
        assert_eq!(merged.get("custom"), Some(&json!("kept")));
        for key in default_document().keys() {
            assert!(merged.contains_key(key), "missing default key {key}");
        }
    }
}
