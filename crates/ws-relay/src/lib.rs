//! WebSocket plumbing for the tile relay.
//!
//! Tile producers connect to the [`Gateway`], authenticate with a digest of
//! the shared map identifier, announce tile metadata, then upload the raw
//! tile bytes. Each upload is matched to its announcement by content
//! fingerprint, prefixed with its grid coordinates, and handed to the single
//! [`UpstreamLink`] to the backend.
//!
//! ```text
//! Producer  --WS-->  Gateway  --[x:i16][y:i16][bytes]-->  UpstreamLink  --WS-->  Backend
//!                       |
//!                  TileCache
//! ```
//!
//! The upstream link reconnects on its own after a fixed delay; the gateway
//! only ever sees whether a frame was accepted.

pub mod auth;
pub mod frame;
pub mod gateway;
pub mod protocol;
pub mod uplink;

pub use auth::AuthKey;
pub use frame::{fingerprint, reframe, HEADER_LEN};
pub use gateway::{BinaryOutcome, ConnectionContext, Gateway, TileHandler};
pub use protocol::{parse_client_message, ClientMessage, ProtocolError, ServerMessage};
pub use uplink::{
    LinkError, LinkState, ReconnectTimer, UplinkConfig, UplinkSink, UpstreamLink,
    DEFAULT_RECONNECT_DELAY,
};
