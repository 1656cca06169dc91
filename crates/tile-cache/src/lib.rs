//! Tile metadata bookkeeping for the tile relay.
//!
//! Producers announce a tile's metadata before uploading its bytes. This
//! crate decides whether an announcement is fresh enough to keep, remembers
//! which content hash belongs to which tile until the bytes arrive, and
//! snapshots the durable part of that state to disk.
//!
//! ```rust
//! use chrono::Utc;
//! use tile_cache::{Announce, TileCache, TileCoords, TileMetadata};
//!
//! let mut cache = TileCache::new();
//! let meta = TileMetadata {
//!     map_id: "map".into(),
//!     file_name: "tile_0_0.png".into(),
//!     coords: TileCoords { x: 0, y: 0 },
//!     hash: "deadbeef".into(),
//!     last_modified_on: Utc::now(),
//! };
//! assert_eq!(cache.announce(meta), Announce::Accepted);
//! assert!(cache.resolve_by_hash("deadbeef").is_some());
//! assert!(cache.resolve_by_hash("deadbeef").is_none());
//! ```

pub mod cache;
pub mod metadata;
pub mod store;

pub use cache::{Announce, SharedTileCache, TileCache};
pub use metadata::{MetadataError, TileAnnouncement, TileCoords, TileMetadata, WireCoords};
pub use store::{StoreError, TileStore, DEFAULT_STATE_FILE};
