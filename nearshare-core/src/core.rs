//! Host-driven API: ShareCore receives transport events and user actions, drives the transport,
//! and notifies observers. One instance owns one lock; every transition happens under it.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::identity::{NeighborId, PayloadId};
use crate::names::NameLookupTable;
use crate::observer::{ConnectionObserver, ObserverId};
use crate::protocol::ApplicationMessage;
use crate::state::ConnectionState;
use crate::transport::{TransferStatus, Transport, TransportError, TransportEvent};
use crate::wire;

/// Which search the device started; `reject` returns to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Advertiser,
    Discoverer,
}

struct Inner {
    state: ConnectionState,
    role: Option<Role>,
    observers: Vec<(ObserverId, Arc<dyn ConnectionObserver>)>,
    next_observer: u64,
}

impl Inner {
    /// Notifies observers unless nothing changed. Entering Failure always notifies.
    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next && !matches!(next, ConnectionState::Failure { .. }) {
            trace!("state unchanged: {}", next);
            return;
        }
        debug!("state {} -> {}", self.state, next);
        self.state = next;
        for (_, obs) in &self.observers {
            obs.on_state_changed(&self.state);
        }
    }

    fn fail(&mut self, message: String) {
        warn!("connection failure: {}", message);
        self.role = None;
        self.set_state(ConnectionState::Failure { message });
    }

    fn report_error(&self, message: &str) {
        warn!("{}", message);
        for (_, obs) in &self.observers {
            obs.on_error(message);
        }
    }

    fn unexpected(&self, action: &'static str) -> ActionError {
        let err = ActionError::UnexpectedState {
            action,
            actual: self.state.name(),
        };
        self.report_error(&err.to_string());
        err
    }
}

/// Connection state machine for one share feature instance.
pub struct ShareCore {
    transport: Arc<dyn Transport>,
    names: Arc<NameLookupTable>,
    local_name: String,
    service_id: String,
    authentication: bool,
    inner: Mutex<Inner>,
}

impl ShareCore {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::with_names(transport, config, Arc::new(NameLookupTable::new()))
    }

    /// Use an existing name table (e.g. one shared with the UI).
    pub fn with_names(
        transport: Arc<dyn Transport>,
        config: &Config,
        names: Arc<NameLookupTable>,
    ) -> Self {
        Self {
            transport,
            names,
            local_name: config.endpoint_name.clone(),
            service_id: config.service_id.clone(),
            authentication: config.authentication,
            inner: Mutex::new(Inner {
                state: ConnectionState::Isolated,
                role: None,
                observers: Vec::new(),
                next_observer: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn authentication_enabled(&self) -> bool {
        self.authentication
    }

    pub fn names(&self) -> &Arc<NameLookupTable> {
        &self.names
    }

    /// Snapshot of the authoritative state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Register an observer. It is immediately given the current state, once.
    pub fn register_observer(&self, observer: Arc<dyn ConnectionObserver>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        observer.on_state_changed(&inner.state);
        inner.observers.push((id, observer));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(oid, _)| *oid != id);
        inner.observers.len() != before
    }

    /// Start broadcasting presence. Valid from Isolated or Failure.
    pub fn start_advertising(&self) -> Result<(), ActionError> {
        let mut inner = self.lock();
        if !inner.state.is_idle() {
            return Err(inner.unexpected("start_advertising"));
        }
        match self.transport.advertise(&self.local_name, &self.service_id) {
            Ok(()) => {
                info!("advertising as {}", self.local_name);
                inner.role = Some(Role::Advertiser);
                inner.set_state(ConnectionState::Advertising);
                Ok(())
            }
            Err(e) => {
                inner.fail(format!("advertising failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Start scanning for advertisers. Valid from Isolated or Failure.
    pub fn start_discovering(&self) -> Result<(), ActionError> {
        let mut inner = self.lock();
        if !inner.state.is_idle() {
            return Err(inner.unexpected("start_discovering"));
        }
        match self.transport.discover(&self.service_id) {
            Ok(()) => {
                info!("discovering");
                inner.role = Some(Role::Discoverer);
                inner.set_state(ConnectionState::Discovering);
                Ok(())
            }
            Err(e) => {
                inner.fail(format!("discovery failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Confirm the pairing token shown while authenticating.
    pub fn accept(&self) -> Result<(), ActionError> {
        let mut inner = self.lock();
        let (id, name) = match inner.state.as_authenticating() {
            Some((id, name, _)) => (id.clone(), name.to_string()),
            None => return Err(inner.unexpected("accept")),
        };
        if let Err(e) = self.transport.accept_connection(&id) {
            inner.fail(format!("accepting {id} failed: {e}"));
            return Err(e.into());
        }
        inner.set_state(ConnectionState::Connecting {
            neighbor_id: id,
            neighbor_name: name,
        });
        Ok(())
    }

    /// Refuse the pending connection and go back to advertising or discovering.
    pub fn reject(&self) -> Result<(), ActionError> {
        let mut inner = self.lock();
        let id = match inner.state.as_authenticating() {
            Some((id, _, _)) => id.clone(),
            None => return Err(inner.unexpected("reject")),
        };
        if let Err(e) = self.transport.reject_connection(&id) {
            warn!("rejecting {} failed: {}", id, e);
        }
        let back = match inner.role {
            Some(Role::Advertiser) => ConnectionState::Advertising,
            Some(Role::Discoverer) => ConnectionState::Discovering,
            None => ConnectionState::Isolated,
        };
        inner.set_state(back);
        Ok(())
    }

    /// Send one message to the connected peer. Valid only in ReadyToSend.
    pub fn send_message(&self, message: ApplicationMessage) -> Result<PayloadId, ActionError> {
        let mut inner = self.lock();
        let (id, name) = match inner.state.as_ready_to_send() {
            Some((id, name)) => (id.clone(), name.map(str::to_string)),
            None => return Err(inner.unexpected("send_message")),
        };
        let bytes = wire::encode_message(&message);
        debug!("sending {} ({} bytes) to {}", message.kind(), bytes.len(), id);
        match self.transport.send_payload(&id, bytes) {
            Ok(payload_id) => {
                inner.set_state(ConnectionState::Sending {
                    neighbor_id: id,
                    neighbor_name: name,
                    payload_id,
                });
                Ok(payload_id)
            }
            Err(e) => {
                inner.fail(format!("sending to {id} failed: {e}"));
                Err(e.into())
            }
        }
    }

    pub fn send_url(&self, url: impl Into<String>) -> Result<PayloadId, ActionError> {
        self.send_message(ApplicationMessage::Url(url.into()))
    }

    pub fn send_page(&self, html: impl Into<String>) -> Result<PayloadId, ActionError> {
        self.send_message(ApplicationMessage::Page(html.into()))
    }

    /// Tear everything down. Valid from any state; always ends Isolated.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        self.transport.stop_advertising();
        self.transport.stop_discovery();
        self.transport.disconnect_all();
        info!("disconnected by user");
        inner.role = None;
        inner.set_state(ConnectionState::Isolated);
    }

    /// Apply one transport callback.
    pub fn handle_event(&self, event: TransportEvent) {
        let mut inner = self.lock();
        trace!("event {} in state {}", event.name(), inner.state.name());
        match event {
            TransportEvent::EndpointFound { id, name } => {
                if inner.state != ConnectionState::Discovering {
                    debug!("ignoring endpoint {} found while {}", id, inner.state.name());
                    return;
                }
                self.names.record(&id, &name);
                match self.transport.request_connection(&id) {
                    Ok(()) => inner.set_state(ConnectionState::Connecting {
                        neighbor_id: id,
                        neighbor_name: name,
                    }),
                    Err(e) => inner.fail(format!("connection request to {id} failed: {e}")),
                }
            }
            TransportEvent::EndpointLost { id } => {
                debug!("endpoint {} lost", id);
            }
            TransportEvent::ConnectionInitiated { id, name, token } => {
                let expected = match &inner.state {
                    ConnectionState::Advertising | ConnectionState::Discovering => true,
                    ConnectionState::Connecting { neighbor_id, .. } => *neighbor_id == id,
                    _ => false,
                };
                if !expected {
                    warn!("ignoring connection from {} while {}", id, inner.state.name());
                    return;
                }
                self.names.record(&id, &name);
                if self.authentication {
                    inner.set_state(ConnectionState::Authenticating {
                        neighbor_id: id,
                        neighbor_name: name,
                        token,
                    });
                    return;
                }
                match self.transport.accept_connection(&id) {
                    Ok(()) => inner.set_state(ConnectionState::Connecting {
                        neighbor_id: id,
                        neighbor_name: name,
                    }),
                    Err(e) => inner.fail(format!("accepting {id} failed: {e}")),
                }
            }
            TransportEvent::ConnectionResult { id, success: false } => {
                // The rejecting side is already back to its role and has no neighbor.
                if inner.state.neighbor_id() != Some(&id) {
                    debug!("ignoring failed connection to {} while {}", id, inner.state.name());
                    return;
                }
                inner.fail(format!("connection to {id} failed"));
            }
            TransportEvent::ConnectionResult { id, success: true } => {
                let pending = inner
                    .state
                    .as_connecting()
                    .is_some_and(|(pending, _)| *pending == id);
                if !pending {
                    warn!("ignoring connection result for {} while {}", id, inner.state.name());
                    return;
                }
                self.transport.stop_advertising();
                self.transport.stop_discovery();
                info!("connected to {}", id);
                let neighbor_name = self.names.lookup(&id);
                inner.set_state(ConnectionState::ReadyToSend {
                    neighbor_id: id,
                    neighbor_name,
                });
            }
            TransportEvent::Disconnected { id } => {
                info!("{} disconnected", id);
                inner.role = None;
                inner.set_state(ConnectionState::Isolated);
            }
            TransportEvent::PayloadReceived { id, bytes } => match wire::decode_message(&bytes) {
                Ok(message) => {
                    let from_name = self.names.lookup(&id);
                    debug!("received {} from {}", message.kind(), id);
                    for (_, obs) in &inner.observers {
                        obs.on_message_received(&message, &id, from_name.as_deref());
                    }
                }
                Err(e) => inner.report_error(&format!("could not parse message from {id}: {e}")),
            },
            TransportEvent::PayloadTransferUpdate { payload_id, status } => {
                let (id, name) = match inner.state.as_sending() {
                    Some((id, name, in_flight)) if in_flight == payload_id => {
                        (id.clone(), name.map(str::to_string))
                    }
                    _ => {
                        trace!("ignoring transfer update for payload {}", payload_id);
                        return;
                    }
                };
                match status {
                    TransferStatus::InProgress => {}
                    TransferStatus::Success => {
                        debug!("payload {} delivered to {}", payload_id, id);
                        for (_, obs) in &inner.observers {
                            obs.on_message_delivered(payload_id);
                        }
                        inner.set_state(ConnectionState::ReadyToSend {
                            neighbor_id: id,
                            neighbor_name: name,
                        });
                    }
                    TransferStatus::Failure => {
                        inner.report_error(&format!("payload {payload_id} to {id} was not delivered"));
                        inner.set_state(ConnectionState::ReadyToSend {
                            neighbor_id: id,
                            neighbor_name: name,
                        });
                    }
                }
            }
        }
    }

    /// Peer the core is currently paired with, if any.
    pub fn neighbor(&self) -> Option<(NeighborId, Option<String>)> {
        let inner = self.lock();
        let id = inner.state.neighbor_id()?.clone();
        let name = self.names.lookup(&id);
        Some((id, name))
    }
}

/// A user action could not be carried out. No state change unless the
/// transport refused it, in which case the core is in Failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("{action} not allowed while {actual}")]
    UnexpectedState {
        action: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}
