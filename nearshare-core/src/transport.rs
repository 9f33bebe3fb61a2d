//! Transport collaborator: the proximity connection broker the core drives.
//! Calls are fire-and-forget; outcomes come back later as [`TransportEvent`]s.

use crate::identity::{NeighborId, PayloadId};

/// Operations the core asks of the connection broker.
///
/// Implementations must not deliver events from inside these calls: queue them
/// and feed them to [`crate::ShareCore::handle_event`] afterwards.
pub trait Transport: Send + Sync {
    /// Start broadcasting presence under `name`. Only peers discovering the same
    /// `service_id` may see it.
    fn advertise(&self, name: &str, service_id: &str) -> Result<(), TransportError>;
    /// Start scanning for advertisers of `service_id`.
    fn discover(&self, service_id: &str) -> Result<(), TransportError>;
    fn stop_advertising(&self);
    fn stop_discovery(&self);
    /// Ask a discovered endpoint for a connection.
    fn request_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError>;
    fn accept_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError>;
    fn reject_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError>;
    /// Hand bytes to the transport. Returns the id later reported in
    /// [`TransportEvent::PayloadTransferUpdate`].
    fn send_payload(&self, endpoint: &NeighborId, bytes: Vec<u8>)
        -> Result<PayloadId, TransportError>;
    /// Tear down every endpoint.
    fn disconnect_all(&self);
}

/// Asynchronous callbacks from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    EndpointFound {
        id: NeighborId,
        name: String,
    },
    EndpointLost {
        id: NeighborId,
    },
    ConnectionInitiated {
        id: NeighborId,
        name: String,
        token: Option<String>,
    },
    ConnectionResult {
        id: NeighborId,
        success: bool,
    },
    Disconnected {
        id: NeighborId,
    },
    PayloadReceived {
        id: NeighborId,
        bytes: Vec<u8>,
    },
    PayloadTransferUpdate {
        payload_id: PayloadId,
        status: TransferStatus,
    },
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::EndpointFound { .. } => "endpoint_found",
            TransportEvent::EndpointLost { .. } => "endpoint_lost",
            TransportEvent::ConnectionInitiated { .. } => "connection_initiated",
            TransportEvent::ConnectionResult { .. } => "connection_result",
            TransportEvent::Disconnected { .. } => "disconnected",
            TransportEvent::PayloadReceived { .. } => "payload_received",
            TransportEvent::PayloadTransferUpdate { .. } => "payload_transfer_update",
        }
    }
}

/// Progress of a payload transfer as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Success,
    Failure,
}

/// Broker refused or failed an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport rejected request: {0}")]
    Rejected(String),
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(NeighborId),
    #[error("transport unavailable")]
    Unavailable,
}
