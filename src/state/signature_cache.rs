use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::SignaturesConfig;

#[derive(Clone, Debug)]
struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl: Duration, now: Instant) -> Self {
        Self {
            data,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

fn purge_expired<K, T>(cache: &mut FxHashMap<K, CacheEntry<T>>, now: Instant, cache_name: &str)
where
    K: Eq + Hash,
{
    let before = cache.len();
    cache.retain(|_, entry| !entry.is_expired(now));
    let after = cache.len();
    if before != after {
        tracing::debug!(
            "[SignatureCache] {} purged {} expired entries",
            cache_name,
            before - after
        );
    }
}

fn enforce_cache_limit<K, T>(
    cache: &mut FxHashMap<K, CacheEntry<T>>,
    limit: usize,
    now: Instant,
    cache_name: &str,
) where
    K: Eq + Hash + Clone,
{
    if cache.len() <= limit {
        return;
    }

    let before = cache.len();
    cache.retain(|_, entry| !entry.is_expired(now));

    if cache.len() > limit {
        let mut oldest_first: Vec<(K, Instant)> = cache
            .iter()
            .map(|(k, entry)| (k.clone(), entry.expires_at))
            .collect();
        oldest_first.sort_by_key(|(_, expires_at)| *expires_at);

        let to_remove = cache.len() - limit;
        for (key, _) in oldest_first.into_iter().take(to_remove) {
            cache.remove(&key);
        }
    }

    tracing::info!(
        "[SignatureCache] {} cleanup: {} -> {} entries (limit: {})",
        cache_name,
        before,
        cache.len(),
        limit
    );
}

/// Continuity signatures seen in backend reasoning output.
///
/// Two independent maps: tool-use id to signature, and signature to the
/// model family that produced it. Signatures shorter than the configured
/// minimum are treated as absent everywhere.
pub struct SignatureCache {
    ttl: Duration,
    min_length: usize,
    tool_limit: usize,
    family_limit: usize,
    tool_signatures: Mutex<FxHashMap<String, CacheEntry<String>>>,
    signature_families: Mutex<FxHashMap<String, CacheEntry<String>>>,
}

impl SignatureCache {
    #[must_use]
    pub fn new(config: &SignaturesConfig) -> Self {
        Self {
            ttl: config.ttl(),
            min_length: config.min_length,
            tool_limit: config.tool_cache_limit,
            family_limit: config.family_cache_limit,
            tool_signatures: Mutex::new(FxHashMap::default()),
            signature_families: Mutex::new(FxHashMap::default()),
        }
    }

    /// Whether `signature` passes the length gate.
    #[must_use]
    pub fn is_usable(&self, signature: &str) -> bool {
        signature.len() >= self.min_length
    }

    pub fn store_tool_signature(&self, tool_use_id: &str, signature: &str) {
        self.store_tool_signature_at(tool_use_id, signature, Instant::now());
    }

    fn store_tool_signature_at(&self, tool_use_id: &str, signature: &str, now: Instant) {
        if tool_use_id.is_empty() || !self.is_usable(signature) {
            return;
        }
        let mut cache = self.tool_signatures.lock();
        tracing::debug!(
            "[SignatureCache] Caching tool signature for id: {}",
            tool_use_id
        );
        cache.insert(
            tool_use_id.to_string(),
            CacheEntry::new(signature.to_string(), self.ttl, now),
        );
        enforce_cache_limit(&mut cache, self.tool_limit, now, "Tool cache");
    }

    #[must_use]
    pub fn tool_signature(&self, tool_use_id: &str) -> Option<String> {
        self.tool_signature_at(tool_use_id, Instant::now())
    }

    fn tool_signature_at(&self, tool_use_id: &str, now: Instant) -> Option<String> {
        let mut cache = self.tool_signatures.lock();
        purge_expired(&mut cache, now, "Tool cache");
        let hit = cache.get(tool_use_id).map(|entry| entry.data.clone());
        if hit.is_some() {
            tracing::debug!(
                "[SignatureCache] Hit tool signature for id: {}",
                tool_use_id
            );
        }
        hit
    }

    pub fn store_signature_family(&self, signature: &str, family: &str) {
        self.store_signature_family_at(signature, family, Instant::now());
    }

    fn store_signature_family_at(&self, signature: &str, family: &str, now: Instant) {
        if !self.is_usable(signature) {
            return;
        }
        let mut cache = self.signature_families.lock();
        tracing::debug!(
            "[SignatureCache] Caching thinking family for sig (len={}): {}",
            signature.len(),
            family
        );
        cache.insert(
            signature.to_string(),
            CacheEntry::new(family.to_string(), self.ttl, now),
        );
        enforce_cache_limit(&mut cache, self.family_limit, now, "Family cache");
    }

    #[must_use]
    pub fn signature_family(&self, signature: &str) -> Option<String> {
        self.signature_family_at(signature, Instant::now())
    }

    fn signature_family_at(&self, signature: &str, now: Instant) -> Option<String> {
        if !self.is_usable(signature) {
            return None;
        }
        let mut cache = self.signature_families.lock();
        purge_expired(&mut cache, now, "Family cache");
        cache.get(signature).map(|entry| entry.data.clone())
    }

    /// A signature is fresh when it passes the length gate and is still
    /// known, either as a family key or as the value stored for a tool id.
    #[must_use]
    pub fn is_fresh(&self, signature: &str) -> bool {
        self.is_fresh_at(signature, Instant::now())
    }

    fn is_fresh_at(&self, signature: &str, now: Instant) -> bool {
        if self.signature_family_at(signature, now).is_some() {
            return true;
        }
        if !self.is_usable(signature) {
            return false;
        }
        let mut cache = self.tool_signatures.lock();
        purge_expired(&mut cache, now, "Tool cache");
        cache.values().any(|entry| entry.data == signature)
    }

    /// Entry counts of the tool and family maps.
    #[must_use]
    pub fn len(&self) -> (usize, usize) {
        (
            self.tool_signatures.lock().len(),
            self.signature_families.lock().len(),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
