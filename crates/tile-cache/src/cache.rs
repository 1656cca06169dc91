use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::metadata::TileMetadata;

/// Result of offering a metadata announcement to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announce {
    /// The announcement superseded (or matched) what was stored.
    Accepted,
    /// A strictly newer record already exists for this file name.
    Stale,
}

impl Announce {
    pub fn is_accepted(self) -> bool {
        matches!(self, Announce::Accepted)
    }
}

/// Tile metadata indexed two ways.
///
/// - `by_name` is durable: one record per file name, used for staleness
///   arbitration and persisted in snapshots.
/// - `by_hash` is ephemeral: it bridges an accepted announcement to the
///   binary frame carrying that content, and each entry is consumed once.
#[derive(Debug, Default)]
pub struct TileCache {
    by_name: HashMap<String, TileMetadata>,
    by_hash: HashMap<String, TileMetadata>,
}

impl TileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a new announcement.
    ///
    /// Rejected only when the stored record for the same file name is
    /// strictly newer. Equal timestamps are accepted.
    pub fn announce(&mut self, meta: TileMetadata) -> Announce {
        if let Some(current) = self.by_name.get(&meta.file_name) {
            if current.last_modified_on > meta.last_modified_on {
                debug!(
                    file_name = %meta.file_name,
                    stored = %current.last_modified_on,
                    offered = %meta.last_modified_on,
                    "stale tile announcement rejected"
                );
                return Announce::Stale;
            }
        }

        trace!(file_name = %meta.file_name, hash = %meta.hash, "tile announcement accepted");
        self.by_hash.insert(meta.hash.clone(), meta.clone());
        self.by_name.insert(meta.file_name.clone(), meta);
        Announce::Accepted
    }

    /// Look up and consume the pending entry for `hash`.
    pub fn resolve_by_hash(&mut self, hash: &str) -> Option<TileMetadata> {
        self.by_hash.remove(hash)
    }

    /// Copy of the durable mapping, for persistence.
    pub fn snapshot(&self) -> HashMap<String, TileMetadata> {
        self.by_name.clone()
    }

    /// Replace all state with a previously persisted mapping.
    pub fn restore(&mut self, by_name: HashMap<String, TileMetadata>) {
        self.by_name = by_name;
        self.by_hash.clear();
    }

    pub fn get(&self, file_name: &str) -> Option<&TileMetadata> {
        self.by_name.get(file_name)
    }

    /// Number of durable entries.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Number of announcements still waiting for their binary frame.
    pub fn pending_len(&self) -> usize {
        self.by_hash.len()
    }
}

/// Cloneable, thread-safe handle around a [`TileCache`].
///
/// Every method holds the lock for exactly one cache operation, so handlers
/// running on different runtime threads see each operation atomically.
#[derive(Debug, Clone, Default)]
pub struct SharedTileCache {
    inner: Arc<Mutex<TileCache>>,
}

impl SharedTileCache {
    pub fn new(cache: TileCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    // A panic while holding the lock cannot leave the maps half-updated
    // (every mutation is a single insert/remove), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, TileCache> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn announce(&self, meta: TileMetadata) -> Announce {
        self.lock().announce(meta)
    }

    pub fn resolve_by_hash(&self, hash: &str) -> Option<TileMetadata> {
        self.lock().resolve_by_hash(hash)
    }

    pub fn snapshot(&self) -> HashMap<String, TileMetadata> {
        self.lock().snapshot()
    }

    pub fn restore(&self, by_name: HashMap<String, TileMetadata>) {
        self.lock().restore(by_name)
    }

    pub fn get(&self, file_name: &str) -> Option<TileMetadata> {
        self.lock().get(file_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TileCoords;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    // -- helpers ----------------------------------------------------------

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn meta(file_name: &str, hash: &str, offset_secs: i64) -> TileMetadata {
        TileMetadata {
            map_id: "map".to_string(),
            file_name: file_name.to_string(),
            coords: TileCoords { x: 1, y: 2 },
            hash: hash.to_string(),
            last_modified_on: base_time() + Duration::seconds(offset_secs),
        }
    }

    // -- announce ---------------------------------------------------------

    #[test]
    fn first_announcement_is_accepted() {
        let mut cache = TileCache::new();
        assert_eq!(cache.announce(meta("a.png", "h1", 0)), Announce::Accepted);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pending_len(), 1);
    }

    #[test]
    fn increasing_timestamps_always_win() {
        let mut cache = TileCache::new();
        for i in 0..5 {
            let hash = format!("h{i}");
            assert!(cache.announce(meta("a.png", &hash, i)).is_accepted());
            assert_eq!(cache.get("a.png").unwrap().hash, hash);
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn older_announcement_is_stale_and_leaves_state_alone() {
        let mut cache = TileCache::new();
        cache.announce(meta("a.png", "new", 10));
        cache.resolve_by_hash("new");

        assert_eq!(cache.announce(meta("a.png", "old", 5)), Announce::Stale);
        assert_eq!(cache.get("a.png").unwrap().hash, "new");
        assert!(cache.resolve_by_hash("old").is_none());
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn equal_timestamp_is_not_stale() {
        let mut cache = TileCache::new();
        cache.announce(meta("a.png", "first", 7));
        assert_eq!(cache.announce(meta("a.png", "second", 7)), Announce::Accepted);
        assert_eq!(cache.get("a.png").unwrap().hash, "second");
    }

    #[test]
    fn different_file_names_do_not_interfere() {
        let mut cache = TileCache::new();
        cache.announce(meta("a.png", "ha", 10));
        assert!(cache.announce(meta("b.png", "hb", 0)).is_accepted());
        assert_eq!(cache.len(), 2);
    }

    // -- resolve_by_hash --------------------------------------------------

    #[test]
    fn hash_resolves_exactly_once() {
        let mut cache = TileCache::new();
        cache.announce(meta("a.png", "h1", 0));

        let resolved = cache.resolve_by_hash("h1").unwrap();
        assert_eq!(resolved.file_name, "a.png");
        assert!(cache.resolve_by_hash("h1").is_none());
        // The durable record survives.
        assert!(cache.get("a.png").is_some());
    }

    #[test]
    fn unknown_hash_resolves_to_nothing() {
        let mut cache = TileCache::new();
        assert!(cache.resolve_by_hash("missing").is_none());
    }

    // -- snapshot / restore -----------------------------------------------

    #[test]
    fn restore_replaces_both_maps() {
        let mut cache = TileCache::new();
        cache.announce(meta("a.png", "ha", 0));

        let mut persisted = HashMap::new();
        persisted.insert("b.png".to_string(), meta("b.png", "hb", 0));
        cache.restore(persisted.clone());

        assert_eq!(cache.snapshot(), persisted);
        assert!(cache.get("a.png").is_none());
        assert_eq!(cache.pending_len(), 0);
    }

    #[test]
    fn restored_entries_still_arbitrate_staleness() {
        let mut cache = TileCache::new();
        let mut persisted = HashMap::new();
        persisted.insert("a.png".to_string(), meta("a.png", "ha", 100));
        cache.restore(persisted);

        assert_eq!(cache.announce(meta("a.png", "older", 50)), Announce::Stale);
        assert!(cache.announce(meta("a.png", "newer", 150)).is_accepted());
    }

    // -- SharedTileCache --------------------------------------------------

    #[test]
    fn shared_handle_clones_see_the_same_state() {
        let shared = SharedTileCache::default();
        let other = shared.clone();

        shared.announce(meta("a.png", "h1", 0));
        assert_eq!(other.len(), 1);
        assert!(other.resolve_by_hash("h1").is_some());
        assert!(shared.resolve_by_hash("h1").is_none());
    }
}
