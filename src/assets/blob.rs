use sha2::{Digest, Sha256};
use std::collections::HashMap;

const BLOB_SCHEME: &str = "blob:";

/// Per-viewer store of temporary in-memory references.
///
/// Registering bytes hands back a `blob:` URL that the asset loader can
/// resolve later; revoking drops the bytes. URLs embed a digest prefix of the
/// content plus a sequence number, so registering the same bytes twice yields
/// two independent references.
#[derive(Default)]
pub struct BlobStore {
    blobs: HashMap<String, Vec<u8>>,
    sequence: u64,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, bytes: Vec<u8>) -> String {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        self.sequence += 1;
        let url = format!("{BLOB_SCHEME}stageview/{}-{}", &digest[..16], self.sequence);
        log::debug!("registered {} ({} bytes)", url, bytes.len());
        self.blobs.insert(url.clone(), bytes);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<&[u8]> {
        self.blobs.get(url).map(Vec::as_slice)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.blobs.contains_key(url)
    }

    /// Drops the bytes behind `url`. Revoking an unknown or already revoked
    /// URL is a no-op returning `false`.
    pub fn revoke(&mut self, url: &str) -> bool {
        let revoked = self.blobs.remove(url).is_some();
        if revoked {
            log::debug!("revoked {}", url);
        }
        revoked
    }

    pub fn revoke_all(&mut self) -> usize {
        let count = self.blobs.len();
        self.blobs.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

pub fn is_blob_url(url: &str) -> bool {
    url.starts_with(BLOB_SCHEME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolve_revoke() {
        let mut store = BlobStore::new();
        let url = store.register(vec![1, 2, 3]);
        assert!(is_blob_url(&url));
        assert_eq!(store.resolve(&url), Some(&[1u8, 2, 3][..]));

        assert!(store.revoke(&url));
        assert!(!store.revoke(&url));
        assert!(store.resolve(&url).is_none());
    }

    #[test]
    fn identical_bytes_get_distinct_urls() {
        let mut store = BlobStore::new();
        let a = store.register(b"same".to_vec());
        let b = store.register(b"same".to_vec());
        assert_ne!(a, b);
        // shared digest prefix, different sequence suffix
        assert_eq!(a.rsplit_once('-').unwrap().0, b.rsplit_once('-').unwrap().0);
        assert_eq!(store.len(), 2);
    }
}
