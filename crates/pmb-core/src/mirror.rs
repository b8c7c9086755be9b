//! Fetching `APKINDEX.tar.gz` archives from Alpine/postmarketOS mirrors.
//!
//! Mirrors are tried in configured order with ETag/Last-Modified caching so
//! unchanged indexes are not re-downloaded every run. Unlike a general
//! artifact fetcher, `APKINDEX` archives are small (hundreds of KB), so
//! there is no resumable chunking here.

use pmb_schema::{Arch, PmbError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cached response metadata for one mirror URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// A map from mirror URL to its cached response metadata, persisted between
/// runs so unchanged indexes are not refetched.
pub type MirrorCache = HashMap<String, CacheEntry>;

/// Fetch an `APKINDEX.tar.gz` for `arch` from the first mirror in `urls`
/// that responds, in order.
///
/// # Errors
///
/// Returns [`PmbError::MirrorUnavailable`] naming every URL tried if none
/// respond successfully.
pub async fn fetch_index(client: &Client, urls: &[String], arch: Arch, cache: &mut MirrorCache) -> Result<Vec<u8>, PmbError> {
    let mut tried = Vec::new();
    for base in urls {
        let url = format!("{base}/{arch}/APKINDEX.tar.gz");
        tried.push(url.clone());
        match fetch_with_cache(client, &url, cache).await {
            Ok(Some(bytes)) => return Ok(bytes),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
    Err(PmbError::MirrorUnavailable { urls: tried })
}

async fn fetch_with_cache(client: &Client, url: &str, cache: &mut MirrorCache) -> Result<Option<Vec<u8>>, PmbError> {
    let mut req = client.get(url);
    if let Some(entry) = cache.get(url) {
        if let Some(etag) = &entry.etag {
            req = req.header("If-None-Match", etag);
        }
        if let Some(lm) = &entry.last_modified {
            req = req.header("If-Modified-Since", lm);
        }
    }

    let resp = req
        .send()
        .await
        .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{url}: {e}")] })?;

    if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(None);
    }
    if !resp.status().is_success() {
        return Err(PmbError::MirrorUnavailable {
            urls: vec![format!("{url}: HTTP {}", resp.status())],
        });
    }

    let etag = resp.headers().get("etag").and_then(|h| h.to_str().ok()).map(str::to_string);
    let last_modified = resp.headers().get("last-modified").and_then(|h| h.to_str().ok()).map(str::to_string);
    cache.insert(url.to_string(), CacheEntry { etag, last_modified });

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| PmbError::MirrorUnavailable { urls: vec![format!("{url}: {e}")] })?;
    Ok(Some(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_mirror_list_is_unavailable() {
        let client = Client::new();
        let mut cache = MirrorCache::new();
        let err = fetch_index(&client, &[], Arch::X86_64, &mut cache).await.unwrap_err();
        assert!(matches!(err, PmbError::MirrorUnavailable { urls } if urls.is_empty()));
    }

    #[tokio::test]
    async fn unreachable_mirrors_are_all_named_in_the_error() {
        let client = Client::new();
        let mut cache = MirrorCache::new();
        let urls = vec!["http://127.0.0.1:1".to_string()];
        let err = fetch_index(&client, &urls, Arch::X86_64, &mut cache).await.unwrap_err();
        match err {
            PmbError::MirrorUnavailable { urls } => assert_eq!(urls.len(), 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
