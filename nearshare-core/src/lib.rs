//! NearShare: connection lifecycle and message framing for sharing pages and URLs between nearby devices.
//! Host-driven: no I/O; the host supplies a transport, feeds its events, and observes state.

pub mod config;
pub mod identity;
pub mod names;
pub mod observer;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use identity::{pairing_token, NeighborId, PayloadId};
pub use names::NameLookupTable;
pub use observer::{ConnectionObserver, ObserverId};
pub use protocol::{ApplicationMessage, PayloadKind, MAX_BYTES_PAYLOAD};
pub use state::ConnectionState;
pub use transport::{TransferStatus, Transport, TransportError, TransportEvent};
pub use wire::{decode_message, encode_message, DecodeError};
pub use crate::core::{ActionError, ShareCore};

pub mod core;
pub mod ffi;
