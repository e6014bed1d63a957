use std::collections::HashMap;

use crate::store::{LocalStore, StoreError};

pub fn normalize_cache_key(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub struct OcrCache {
    entries: HashMap<String, String>,
    store: Option<LocalStore>,
}

impl OcrCache {
    pub fn load(store: &LocalStore) -> Result<Self, StoreError> {
        let entries = store.load_ocr_cache()?;
        log::debug!("Loaded {} cached OCR results", entries.len());
        Ok(Self {
            entries,
            store: Some(store.clone()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            store: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries.get(normalize_cache_key(url)).map(String::as_str)
    }

    pub fn put(&mut self, url: &str, text: &str) -> Result<(), StoreError> {
        let key = normalize_cache_key(url);
        self.entries.insert(key.to_string(), text.to_string());
        if let Some(store) = &self.store {
            store.put_ocr_entry(key, text)?;
        }
        Ok(())
    }
}
