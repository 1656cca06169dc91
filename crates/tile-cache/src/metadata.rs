use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while turning a wire announcement into [`TileMetadata`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("tile coordinates ({x}, {y}) do not fit a signed 16-bit grid")]
    CoordsOutOfRange { x: i64, y: i64 },
}

/// Grid position of a tile. Both axes are signed 16-bit values because the
/// upstream header encodes them as big-endian `i16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoords {
    pub x: i16,
    pub y: i16,
}

/// Metadata describing one map tile, announced by a producer before it sends
/// the tile's binary content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMetadata {
    pub map_id: String,
    /// Stable logical key. Re-announcing a changed tile reuses the name.
    pub file_name: String,
    pub coords: TileCoords,
    /// Fingerprint of the binary payload that will follow this announcement.
    pub hash: String,
    pub last_modified_on: DateTime<Utc>,
}

/// Raw coordinates as they arrive from producers, before range checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCoords {
    pub x: i64,
    pub y: i64,
}

/// The `data` object of a `map.tile.info` message.
///
/// Identical to [`TileMetadata`] except the coordinates are unchecked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileAnnouncement {
    pub map_id: String,
    pub file_name: String,
    pub coords: WireCoords,
    pub hash: String,
    pub last_modified_on: DateTime<Utc>,
}

impl TryFrom<WireCoords> for TileCoords {
    type Error = MetadataError;

    fn try_from(wire: WireCoords) -> Result<Self, Self::Error> {
        let out_of_range = || MetadataError::CoordsOutOfRange {
            x: wire.x,
            y: wire.y,
        };
        let x = i16::try_from(wire.x).map_err(|_| out_of_range())?;
        let y = i16::try_from(wire.y).map_err(|_| out_of_range())?;
        Ok(Self { x, y })
    }
}

impl TryFrom<TileAnnouncement> for TileMetadata {
    type Error = MetadataError;

    fn try_from(announcement: TileAnnouncement) -> Result<Self, Self::Error> {
        Ok(Self {
            coords: TileCoords::try_from(announcement.coords)?,
            map_id: announcement.map_id,
            file_name: announcement.file_name,
            hash: announcement.hash,
            last_modified_on: announcement.last_modified_on,
        })
    }
}
