//! UI collaborator callbacks.

use crate::identity::{NeighborId, PayloadId};
use crate::protocol::ApplicationMessage;
use crate::state::ConnectionState;

/// Receives notifications from a [`crate::ShareCore`]. Called with the core's
/// lock held, in the order states were produced; must not call back into the
/// same core synchronously.
pub trait ConnectionObserver: Send + Sync {
    fn on_state_changed(&self, _state: &ConnectionState) {}

    /// A peer shared something. The UI asks the user before opening it.
    fn on_message_received(
        &self,
        _message: &ApplicationMessage,
        _from: &NeighborId,
        _from_name: Option<&str>,
    ) {
    }

    fn on_message_delivered(&self, _payload_id: PayloadId) {}

    /// Non-fatal error: bad payload, rejected action, failed delivery.
    fn on_error(&self, _message: &str) {}
}

/// Handle returned by [`crate::ShareCore::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);
