//! Artifact cache and the conditional fetch protocol.
//!
//! Every converted artifact is stored as a [`SavedBinary`] together with the
//! upstream timestamp and ETag it was produced from, so that the next request
//! can skip both the download and the conversion when nothing changed.

pub mod file;
pub mod memory;
pub mod redis;

pub use self::redis::RedisCache;
pub use file::FileCache;
pub use memory::MemoryCache;

use crate::binary::codec::put_uvarint_bytes;
use crate::binary::ByteReader;
use crate::source::{FetchRequest, Source};
use crate::{Error, Result};

const SAVED_BINARY_VERSION: u8 = 1;

/// A cached artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedBinary {
    pub content: Vec<u8>,
    /// Upstream modification time in unix seconds. 0 means unknown.
    pub last_updated: i64,
    pub last_etag: String,
}

impl SavedBinary {
    /// Serialize as `[1][uvarint len + content][i64 BE secs][uvarint len + etag]`.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.content.len() + self.last_etag.len() + 20);
        buf.push(SAVED_BINARY_VERSION);
        put_uvarint_bytes(&mut buf, &self.content);
        buf.extend_from_slice(&self.last_updated.to_be_bytes());
        put_uvarint_bytes(&mut buf, self.last_etag.as_bytes());
        buf
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let version = reader.read_u8()?;
        if version != SAVED_BINARY_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let content = reader.read_uvarint_bytes()?.to_vec();
        let last_updated = reader.read_i64_be()?;
        let last_etag = reader.read_string()?;
        Ok(Self {
            content,
            last_updated,
            last_etag,
        })
    }
}

/// Storage for converted artifacts.
pub trait Cache: Send + Sync {
    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Load an entry. A missing or expired entry is `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<SavedBinary>>;

    /// Store an entry, replacing any previous one.
    fn save(&self, key: &str, binary: &SavedBinary) -> Result<()>;
}

/// Serve `path` from `cache`, refetching and reconverting only when the
/// source reports a change.
///
/// `convert` turns fetched content into the artifact that is cached and
/// returned. It is not called when the cached entry is still current.
pub fn fetch_cached<F>(
    cache: &dyn Cache,
    source: &dyn Source,
    key: &str,
    path: &str,
    convert: F,
) -> Result<SavedBinary>
where
    F: FnOnce(&[u8]) -> Result<Vec<u8>>,
{
    let cached = cache.load(key)?;
    let last_updated = source.last_updated(path);
    if let Some(cached) = &cached {
        if last_updated != 0 && cached.last_updated == last_updated {
            log::debug!("serving {} from cache", key);
            return Ok(cached.clone());
        }
    }

    let request = cached
        .as_ref()
        .map(|c| FetchRequest {
            etag: c.last_etag.clone(),
            last_updated: c.last_updated,
        })
        .unwrap_or_default();
    let response = source.fetch(path, &request)?;

    if response.not_modified {
        let mut cached = cached
            .ok_or_else(|| Error::Fetch("unexpected not modified response".to_string()))?;
        if response.last_updated != cached.last_updated {
            cached.last_updated = response.last_updated;
            cache.save(key, &cached)?;
        }
        log::debug!("{} not modified", key);
        return Ok(cached);
    }
    if response.content.is_empty() {
        return Err(Error::Fetch(format!("empty content from {}", path)));
    }

    let saved = SavedBinary {
        content: convert(&response.content)?,
        last_updated: response.last_updated,
        last_etag: response.etag,
    };
    cache.save(key, &saved)?;
    log::info!("updated {} ({} bytes)", key, saved.content.len());
    Ok(saved)
}
