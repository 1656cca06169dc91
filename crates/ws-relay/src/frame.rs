use sha2::{Digest, Sha256};

use tile_cache::TileCoords;

/// Length of the coordinate header prepended to every upstream frame.
pub const HEADER_LEN: usize = 4;

/// Lowercase hex SHA-256 of `bytes`.
///
/// Producers use the same digest for the `hash` field of a tile
/// announcement, which is how a binary frame finds its metadata.
pub fn fingerprint(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// Build the upstream payload: `x` and `y` as big-endian `i16`, then the
/// tile bytes unchanged.
pub fn reframe(coords: TileCoords, tile: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + tile.len());
    out.extend_from_slice(&coords.x.to_be_bytes());
    out.extend_from_slice(&coords.y.to_be_bytes());
    out.extend_from_slice(tile);
    out
}

/// Split an upstream payload back into coordinates and tile bytes.
///
/// Returns `None` when the payload is shorter than the header.
#[cfg(test)]
pub(crate) fn split_frame(frame: &[u8]) -> Option<(TileCoords, &[u8])> {
    if frame.len() < HEADER_LEN {
        return None;
    }
    let x = i16::from_be_bytes([frame[0], frame[1]]);
    let y = i16::from_be_bytes([frame[2], frame[3]]);
    Some((TileCoords { x, y }, &frame[HEADER_LEN..]))
}
