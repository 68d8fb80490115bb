//! Access token storage.
//!
//! The client never keeps a token in memory between calls: it asks its
//! [`TokenStore`] right before every attempt, so a sign-in or sign-out
//! elsewhere in the process takes effect on the next request.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Key the access token is stored under in a [`FileTokenStore`].
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Source of the bearer token attached to outgoing requests.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Current access token, or `None` when the user is signed out.
    fn access_token(&self) -> Option<String>;

    /// Persists a new access token.
    fn store(&self, token: &str) -> io::Result<()>;

    /// Removes the stored access token.
    fn clear(&self) -> io::Result<()>;
}

fn usable(token: &str) -> Option<String> {
    let trimmed = token.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// In-memory token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for MemoryTokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTokenStore")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        guard.as_deref().and_then(usable)
    }

    fn store(&self, token: &str) -> io::Result<()> {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token.to_owned());
        Ok(())
    }

    fn clear(&self) -> io::Result<()> {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        Ok(())
    }
}

/// Token store backed by a JSON object file.
///
/// The token lives under [`ACCESS_TOKEN_KEY`]; other keys in the file are
/// preserved on write.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> io::Result<BTreeMap<String, serde_json::Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn write_entries(&self, entries: &BTreeMap<String, serde_json::Value>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let temp_path = self.path.with_extension("tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&temp_path)?;

        // `mode` only applies on creation; a leftover temp file keeps its bits.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        match self.read_entries() {
            Ok(entries) => entries
                .get(ACCESS_TOKEN_KEY)
                .and_then(serde_json::Value::as_str)
                .and_then(usable),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = ?self.path, error = %_err, "token file unreadable, sending request unauthenticated");
                None
            }
        }
    }

    fn store(&self, token: &str) -> io::Result<()> {
        let mut entries = self.read_entries()?;
        entries.insert(
            ACCESS_TOKEN_KEY.to_owned(),
            serde_json::Value::String(token.to_owned()),
        );
        self.write_entries(&entries)
    }

    fn clear(&self) -> io::Result<()> {
        let mut entries = self.read_entries()?;
        if entries.remove(ACCESS_TOKEN_KEY).is_none() && !self.path.exists() {
            return Ok(());
        }
        self.write_entries(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::{FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY};

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.access_token(), None);

        store.store("abc").unwrap();
        assert_eq!(store.access_token().as_deref(), Some("abc"));

        store.clear().unwrap();
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn blank_token_counts_as_absent() {
        let store = MemoryTokenStore::with_token("   ");
        assert_eq!(store.access_token(), None);
    }

    #[test]
    fn file_store_missing_file_is_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        assert_eq!(store.access_token(), None);
        store.clear().unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn file_store_roundtrip_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"locale":"de"}"#).unwrap();

        let store = FileTokenStore::new(&path);
        store.store("secret").unwrap();
        assert_eq!(store.access_token().as_deref(), Some("secret"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["locale"], "de");
        assert_eq!(raw[ACCESS_TOKEN_KEY], "secret");

        store.clear().unwrap();
        assert_eq!(store.access_token(), None);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["locale"], "de");
    }

    #[test]
    fn file_store_is_read_on_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::new(&path);

        std::fs::write(&path, r#"{"accessToken":"first"}"#).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("first"));

        std::fs::write(&path, r#"{"accessToken":"second"}"#).unwrap();
        assert_eq!(store.access_token().as_deref(), Some("second"));
    }

    #[test]
    fn malformed_file_is_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(FileTokenStore::new(&path).access_token(), None);
    }

    #[test]
    fn unparseable_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let original = r#"["keep-me", {"locale":"de"}]"#;
        std::fs::write(&path, original).unwrap();

        let store = FileTokenStore::new(&path);
        let err = store.store("secret").expect_err("non-object file must not be overwritten");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(store.clear().is_err());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn leftover_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        let temp_path = store.path().with_extension("tmp");
        std::fs::write(&temp_path, "stale").unwrap();
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.store("secret").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.access_token().as_deref(), Some("secret"));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("tokens.json"));
        store.store("secret").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
