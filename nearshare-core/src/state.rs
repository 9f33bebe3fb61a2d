//! Connection state: inert data, one value authoritative per [`crate::ShareCore`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{NeighborId, PayloadId};

/// Where the device is in the share lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and no attempt in progress. Initial state.
    #[default]
    Isolated,
    /// Broadcasting presence; no peer yet.
    Advertising,
    /// Scanning for advertisers; no peer yet.
    Discovering,
    /// Peer found; the pairing token must be confirmed by the local user.
    Authenticating {
        neighbor_id: NeighborId,
        neighbor_name: String,
        token: Option<String>,
    },
    /// Authentication done (or disabled); link being established.
    Connecting {
        neighbor_id: NeighborId,
        neighbor_name: String,
    },
    /// Link up, nothing in flight.
    ReadyToSend {
        neighbor_id: NeighborId,
        neighbor_name: Option<String>,
    },
    /// Exactly one outbound payload in flight.
    Sending {
        neighbor_id: NeighborId,
        neighbor_name: Option<String>,
        payload_id: PayloadId,
    },
    /// Transport or protocol error. Left only by advertise, discover or disconnect.
    Failure { message: String },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Isolated => "Isolated",
            ConnectionState::Advertising => "Advertising",
            ConnectionState::Discovering => "Discovering",
            ConnectionState::Authenticating { .. } => "Authenticating",
            ConnectionState::Connecting { .. } => "Connecting",
            ConnectionState::ReadyToSend { .. } => "ReadyToSend",
            ConnectionState::Sending { .. } => "Sending",
            ConnectionState::Failure { .. } => "Failure",
        }
    }

    /// Peer this state is about, if any.
    pub fn neighbor_id(&self) -> Option<&NeighborId> {
        match self {
            ConnectionState::Authenticating { neighbor_id, .. }
            | ConnectionState::Connecting { neighbor_id, .. }
            | ConnectionState::ReadyToSend { neighbor_id, .. }
            | ConnectionState::Sending { neighbor_id, .. } => Some(neighbor_id),
            _ => None,
        }
    }

    /// Name to show for the peer, if one is known in this state.
    pub fn neighbor_name(&self) -> Option<&str> {
        match self {
            ConnectionState::Authenticating { neighbor_name, .. }
            | ConnectionState::Connecting { neighbor_name, .. } => Some(neighbor_name),
            ConnectionState::ReadyToSend { neighbor_name, .. }
            | ConnectionState::Sending { neighbor_name, .. } => neighbor_name.as_deref(),
            _ => None,
        }
    }

    /// Returns (id, name, token) when authenticating.
    pub fn as_authenticating(&self) -> Option<(&NeighborId, &str, Option<&str>)> {
        match self {
            ConnectionState::Authenticating {
                neighbor_id,
                neighbor_name,
                token,
            } => Some((neighbor_id, neighbor_name, token.as_deref())),
            _ => None,
        }
    }

    /// Returns (id, name) when connecting.
    pub fn as_connecting(&self) -> Option<(&NeighborId, &str)> {
        match self {
            ConnectionState::Connecting {
                neighbor_id,
                neighbor_name,
            } => Some((neighbor_id, neighbor_name)),
            _ => None,
        }
    }

    /// Returns (id, name) when ready to send.
    pub fn as_ready_to_send(&self) -> Option<(&NeighborId, Option<&str>)> {
        match self {
            ConnectionState::ReadyToSend {
                neighbor_id,
                neighbor_name,
            } => Some((neighbor_id, neighbor_name.as_deref())),
            _ => None,
        }
    }

    /// Returns (id, name, payload id) while a payload is in flight.
    pub fn as_sending(&self) -> Option<(&NeighborId, Option<&str>, PayloadId)> {
        match self {
            ConnectionState::Sending {
                neighbor_id,
                neighbor_name,
                payload_id,
            } => Some((neighbor_id, neighbor_name.as_deref(), *payload_id)),
            _ => None,
        }
    }

    /// Advertise or discover may start from here.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            ConnectionState::Isolated | ConnectionState::Failure { .. }
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Failure { message } => write!(f, "Failure({message})"),
            other => match (other.neighbor_id(), other.neighbor_name()) {
                (Some(id), Some(name)) => write!(f, "{}({id}, {name})", other.name()),
                (Some(id), None) => write!(f, "{}({id})", other.name()),
                _ => f.write_str(other.name()),
            },
        }
    }
}
