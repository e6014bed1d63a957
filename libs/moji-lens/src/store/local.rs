use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const API_KEY_SETTING: &str = "anthropicApiKey";

const DATA_DIR_NAME: &str = ".moji-lens";
const DATABASE_FILE: &str = "moji_lens.db";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to find home directory")]
    NoHomeDir,
}

#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    pub fn default_dir() -> Result<PathBuf, StoreError> {
        let mut path = dirs::home_dir().ok_or(StoreError::NoHomeDir)?;
        path.push(DATA_DIR_NAME);
        Ok(path)
    }

    pub fn open_dir(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Self::open(&dir.join(DATABASE_FILE))
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        log::debug!("Opening local store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ocr_cache (
                url TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn api_key(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_setting(API_KEY_SETTING)?
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty()))
    }

    pub fn set_api_key(&self, key: &str) -> Result<(), StoreError> {
        self.set_setting(API_KEY_SETTING, key.trim())
    }

    pub fn load_ocr_cache(&self) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT url, text FROM ocr_cache")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut entries = HashMap::new();
        for row in rows {
            let (url, text) = row?;
            entries.insert(url, text);
        }
        Ok(entries)
    }

    pub fn put_ocr_entry(&self, url: &str, text: &str) -> Result<(), StoreError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ocr_cache (url, text, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET text = excluded.text, created_at = excluded.created_at",
            params![url, text, created_at],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_roundtrip() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.api_key().unwrap(), None);

        store.set_api_key("  sk-ant-test  ").unwrap();
        assert_eq!(store.api_key().unwrap().as_deref(), Some("sk-ant-test"));

        store.set_api_key("").unwrap();
        assert_eq!(store.api_key().unwrap(), None);
    }

    #[test]
    fn test_ocr_cache_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open_dir(dir.path()).unwrap();
            store.put_ocr_entry("https://x/a.png", "東京").unwrap();
            store.put_ocr_entry("https://x/a.png", "大阪").unwrap();
            store.put_ocr_entry("https://x/b.png", "").unwrap();
        }

        let store = LocalStore::open_dir(dir.path()).unwrap();
        let entries = store.load_ocr_cache().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["https://x/a.png"], "大阪");
        assert_eq!(entries["https://x/b.png"], "");
    }
}
