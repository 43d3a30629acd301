//! Result cache
//!
//! Fingerprinted store for analysis results in Redis. The key is
//! `analysis:sha256(path ":" mtime)`, so any change to the directory's
//! mtime produces a fresh fingerprint and the stale entry just expires.
//!
//! Expiry is enforced twice: Redis TTL at the storage layer and an
//! `expires_at` stamp inside the entry, checked (and cleaned up) on read.
//! All operations degrade on infrastructure errors: a broken cache means
//! cache misses, never failed jobs.

use crate::analyzer::AnalysisResult;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const KEY_PREFIX: &str = "analysis:";
const SCAN_BATCH: usize = 100;

/// Stored cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub result: AnalysisResult,
    /// sha256 of the project path, for invalidation scans
    pub project_hash: String,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Cache statistics for operator endpoints
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub expired: u64,
}

/// Cache key for a (path, mtime) fingerprint
pub fn cache_key(path: &str, last_modified: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b":");
    hasher.update(last_modified.to_rfc3339().as_bytes());
    format!("{}{:x}", KEY_PREFIX, hasher.finalize())
}

/// Path hash stored inside entries for invalidation
pub fn project_hash(path: &str) -> String {
    format!("{:x}", Sha256::digest(path.as_bytes()))
}

#[derive(Clone)]
pub struct ResultCache {
    conn: ConnectionManager,
    ttl_seconds: u64,
}

impl ResultCache {
    pub fn new(conn: ConnectionManager, ttl_hours: u64) -> Self {
        Self {
            conn,
            ttl_seconds: ttl_hours * 3600,
        }
    }

    /// Look up a cached result for the fingerprint. A present-but-expired
    /// entry is deleted on access.
    pub async fn get(&self, path: &str, last_modified: DateTime<Utc>) -> Option<CacheEntry> {
        let key = cache_key(path, last_modified);
        let mut conn = self.conn.clone();

        let raw: Option<String> = match conn.get(&key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache get failed: {}", e);
                return None;
            }
        };
        let raw = raw?;

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache entry corrupt; deleting: {}", e);
                let _: Result<(), _> = conn.del(&key).await;
                return None;
            }
        };

        if entry.expires_at <= Utc::now() {
            debug!("Cache entry expired; deleting");
            let _: Result<(), _> = conn.del(&key).await;
            return None;
        }

        // The fingerprint already encodes the mtime; this guards against
        // hash collisions and entry tampering
        if entry.last_modified != last_modified {
            return None;
        }

        Some(entry)
    }

    /// Store a result under the fingerprint. Returns false (and logs) on
    /// failure; a missed write is a future cache miss, nothing more.
    pub async fn set(
        &self,
        path: &str,
        last_modified: DateTime<Utc>,
        result: &AnalysisResult,
    ) -> bool {
        let key = cache_key(path, last_modified);
        let now = Utc::now();
        let entry = CacheEntry {
            result: result.clone(),
            project_hash: project_hash(path),
            last_modified,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(self.ttl_seconds as i64),
        };

        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Cache entry serialization failed: {}", e);
                return false;
            }
        };

        let mut conn = self.conn.clone();
        match conn.set_ex::<_, _, ()>(&key, json, self.ttl_seconds).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache set failed: {}", e);
                false
            }
        }
    }

    /// Best-effort invalidation of every entry for a path. Requires a key
    /// scan; missed entries expire naturally.
    pub async fn invalidate(&self, path: &str) -> u64 {
        let target_hash = project_hash(path);
        let mut removed = 0;
        let mut conn = self.conn.clone();

        for key in self.scan_keys().await {
            let raw: Option<String> = match conn.get(&key).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let Some(raw) = raw else { continue };
            let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) else {
                continue;
            };
            if entry.project_hash == target_hash {
                if conn.del::<_, ()>(&key).await.is_ok() {
                    removed += 1;
                }
            }
        }

        debug!(path = %path, removed, "Cache invalidation complete");
        removed
    }

    /// Remove entries whose application-layer expiry has passed (the
    /// storage TTL normally beats this; it exists for clock disagreements)
    pub async fn clear_expired(&self) -> u64 {
        let now = Utc::now();
        let mut removed = 0;
        let mut conn = self.conn.clone();

        for key in self.scan_keys().await {
            let raw: Option<String> = match conn.get(&key).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let Some(raw) = raw else { continue };
            let expired = match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => entry.expires_at <= now,
                // Unparseable entries count as expired
                Err(_) => true,
            };
            if expired && conn.del::<_, ()>(&key).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut stats = CacheStats::default();
        let mut conn = self.conn.clone();

        for key in self.scan_keys().await {
            stats.entries += 1;
            if let Ok(Some(raw)) = conn.get::<_, Option<String>>(&key).await {
                if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                    if entry.expires_at <= now {
                        stats.expired += 1;
                    }
                }
            }
        }
        stats
    }

    /// True when the backing store answers a ping
    pub async fn healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn scan_keys(&self) -> Vec<String> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        let pattern = format!("{}*", KEY_PREFIX);

        loop {
            let result: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;

            match result {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Cache scan failed: {}", e);
                    break;
                }
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_changes_with_mtime() {
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(1);
        let a = cache_key("/projects/demo", t1);
        let b = cache_key("/projects/demo", t2);
        assert_ne!(a, b);
        assert!(a.starts_with(KEY_PREFIX));

        // Deterministic for the same fingerprint
        assert_eq!(a, cache_key("/projects/demo", t1));
    }

    #[test]
    fn test_cache_key_changes_with_path() {
        let t = Utc::now();
        assert_ne!(cache_key("/a", t), cache_key("/b", t));
    }

    #[test]
    fn test_project_hash_is_stable_sha256() {
        let hash = project_hash("/projects/demo");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, project_hash("/projects/demo"));
        assert_ne!(hash, project_hash("/projects/other"));
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let result = crate::analyzer::parse_analysis(
            "```json\n{\"summary\": \"cached\", \"completionScore\": 42}\n```",
            "m",
            10,
        );
        let now = Utc::now();
        let entry = CacheEntry {
            result: result.clone(),
            project_hash: project_hash("/p"),
            last_modified: now,
            created_at: now,
            expires_at: now + ChronoDuration::hours(24),
        };

        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result, result);
        assert_eq!(back.project_hash, entry.project_hash);
        assert_eq!(back.expires_at, entry.expires_at);
    }
}
