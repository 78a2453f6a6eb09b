//! Disk-backed cache storage.
//!
//! Each store is one JSON file in the storage directory. Files are rewritten
//! whole through a temporary file and a rename, so a store on disk is always
//! either the old or the new version.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::{CacheBackend, CacheEntry};
use crate::error::Result;
use crate::request::CacheKey;

const STORE_EXTENSION: &str = "json";

/// Cache storage persisted under a directory.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    io: Mutex<()>,
}

impl DiskCacheStorage {
    /// Open storage rooted at `root`, creating the directory.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            io: Mutex::new(()),
        })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{STORE_EXTENSION}", encode_name(name)))
    }

    async fn read_store(&self, name: &str) -> Result<Option<Vec<CacheEntry>>> {
        match tokio::fs::read(self.store_path(name)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_store(&self, name: &str, entries: &[CacheEntry]) -> Result<()> {
        let path = self.store_path(name);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let _guard = self.io.lock().await;
        if self.read_store(name).await?.is_none() {
            debug!(cache_name = name, "Creating store on disk");
            self.write_store(name, &[]).await?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let _guard = self.io.lock().await;
        Ok(tokio::fs::try_exists(self.store_path(name)).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.io.lock().await;
        match tokio::fs::remove_file(self.store_path(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.io.lock().await;
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STORE_EXTENSION) {
                continue;
            }
            if let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn match_entry(&self, name: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let _guard = self.io.lock().await;
        Ok(self
            .read_store(name)
            .await?
            .and_then(|entries| entries.into_iter().find(|e| &e.key == key)))
    }

    async fn put_entry(&self, name: &str, entry: CacheEntry) -> Result<()> {
        let _guard = self.io.lock().await;
        let mut entries = self.read_store(name).await?.unwrap_or_default();
        entries.retain(|e| e.key != entry.key);
        entries.push(entry);
        self.write_store(name, &entries).await
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<CacheKey>> {
        let _guard = self.io.lock().await;
        let mut keys: Vec<CacheKey> = self
            .read_store(name)
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Escape a store name into a file stem.
fn encode_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn decode_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
