//! In-process transport: devices joined to one LoopbackNetwork find, pair with and send to
//! each other. Outcomes are pushed to each device's event inbox, never returned inline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use nearshare_core::{
    pairing_token, NeighborId, PayloadId, PayloadKind, TransferStatus, Transport, TransportError,
    TransportEvent,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, trace};

use crate::runtime::EventSender;

const ENDPOINT_ID_LEN: usize = 4;

/// `advertising` and `discovering` hold the service id while active.
struct Endpoint {
    name: String,
    inbox: EventSender,
    advertising: Option<String>,
    discovering: Option<String>,
}

impl Endpoint {
    fn discovers(&self, service_id: &str) -> bool {
        self.discovering.as_deref() == Some(service_id)
    }

    fn advertises(&self, service_id: &str) -> bool {
        self.advertising.as_deref() == Some(service_id)
    }
}

type Pair = (NeighborId, NeighborId);

fn pair(a: &NeighborId, b: &NeighborId) -> Pair {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn other<'a>(p: &'a Pair, me: &NeighborId) -> &'a NeighborId {
    if p.0 == *me {
        &p.1
    } else {
        &p.0
    }
}

#[derive(Default)]
struct Links {
    endpoints: HashMap<NeighborId, Endpoint>,
    /// Requested connections and which side has accepted so far.
    pending: HashMap<Pair, HashSet<NeighborId>>,
    connected: HashSet<Pair>,
    last_payload: i64,
}

impl Links {
    fn notify(&self, to: &NeighborId, event: TransportEvent) {
        match self.endpoints.get(to) {
            Some(ep) => {
                if ep.inbox.send(event).is_err() {
                    trace!("inbox of {} closed", to);
                }
            }
            None => trace!("no endpoint {}", to),
        }
    }

    fn endpoint_mut(&mut self, id: &NeighborId) -> Result<&mut Endpoint, TransportError> {
        self.endpoints.get_mut(id).ok_or(TransportError::Unavailable)
    }
}

/// Shared medium for loopback devices.
#[derive(Default)]
pub struct LoopbackNetwork {
    links: Mutex<Links>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Links> {
        match self.links.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Attach a device with a fresh random endpoint id; its events go to `inbox`.
    pub fn join(self: &Arc<Self>, name: &str, inbox: EventSender) -> LoopbackTransport {
        let mut links = self.lock();
        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ENDPOINT_ID_LEN)
                .map(char::from)
                .collect();
            let candidate = NeighborId::new(candidate);
            if !links.endpoints.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!("{} joined loopback as {}", name, id);
        links.endpoints.insert(
            id.clone(),
            Endpoint {
                name: name.to_string(),
                inbox,
                advertising: None,
                discovering: None,
            },
        );
        LoopbackTransport {
            id,
            network: Arc::clone(self),
        }
    }

    #[cfg(test)]
    fn joined(&self) -> usize {
        self.lock().endpoints.len()
    }
}

/// One device's view of a LoopbackNetwork. Leaves the network on drop.
pub struct LoopbackTransport {
    id: NeighborId,
    network: Arc<LoopbackNetwork>,
}

impl LoopbackTransport {
    /// Endpoint id other devices see for this one.
    pub fn id(&self) -> &NeighborId {
        &self.id
    }

    fn drop_links(&self, links: &mut Links) {
        let me = &self.id;
        let connected: Vec<Pair> = links
            .connected
            .iter()
            .filter(|p| p.0 == *me || p.1 == *me)
            .cloned()
            .collect();
        let pending: Vec<Pair> = links
            .pending
            .keys()
            .filter(|p| p.0 == *me || p.1 == *me)
            .cloned()
            .collect();
        for p in &connected {
            links.connected.remove(p);
        }
        for p in &pending {
            links.pending.remove(p);
        }
        for p in connected.iter().chain(pending.iter()) {
            links.notify(other(p, me), TransportEvent::Disconnected { id: me.clone() });
        }
    }
}

impl Transport for LoopbackTransport {
    fn advertise(&self, name: &str, service_id: &str) -> Result<(), TransportError> {
        let mut links = self.network.lock();
        let me = links.endpoint_mut(&self.id)?;
        me.name = name.to_string();
        me.advertising = Some(service_id.to_string());
        let discoverers: Vec<NeighborId> = links
            .endpoints
            .iter()
            .filter(|(id, ep)| ep.discovers(service_id) && **id != self.id)
            .map(|(id, _)| id.clone())
            .collect();
        for d in &discoverers {
            links.notify(
                d,
                TransportEvent::EndpointFound {
                    id: self.id.clone(),
                    name: name.to_string(),
                },
            );
        }
        Ok(())
    }

    fn discover(&self, service_id: &str) -> Result<(), TransportError> {
        let mut links = self.network.lock();
        links.endpoint_mut(&self.id)?.discovering = Some(service_id.to_string());
        let advertisers: Vec<(NeighborId, String)> = links
            .endpoints
            .iter()
            .filter(|(id, ep)| ep.advertises(service_id) && **id != self.id)
            .map(|(id, ep)| (id.clone(), ep.name.clone()))
            .collect();
        for (id, name) in advertisers {
            links.notify(&self.id, TransportEvent::EndpointFound { id, name });
        }
        Ok(())
    }

    fn stop_advertising(&self) {
        let mut links = self.network.lock();
        let service = match links.endpoints.get_mut(&self.id) {
            Some(me) => me.advertising.take(),
            None => None,
        };
        let Some(service) = service else {
            return;
        };
        let discoverers: Vec<NeighborId> = links
            .endpoints
            .iter()
            .filter(|(id, ep)| ep.discovers(&service) && **id != self.id)
            .map(|(id, _)| id.clone())
            .collect();
        for d in &discoverers {
            links.notify(d, TransportEvent::EndpointLost { id: self.id.clone() });
        }
    }

    fn stop_discovery(&self) {
        if let Some(me) = self.network.lock().endpoints.get_mut(&self.id) {
            me.discovering = None;
        }
    }

    fn request_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let mut links = self.network.lock();
        let target_name = match links.endpoints.get(endpoint) {
            Some(ep) if ep.advertising.is_some() => ep.name.clone(),
            _ => return Err(TransportError::UnknownEndpoint(endpoint.clone())),
        };
        let my_name = links.endpoint_mut(&self.id)?.name.clone();
        let token = pairing_token(&self.id, endpoint);
        debug!("{} requests {} (token {})", self.id, endpoint, token);
        links.pending.insert(pair(&self.id, endpoint), HashSet::new());
        links.notify(
            &self.id,
            TransportEvent::ConnectionInitiated {
                id: endpoint.clone(),
                name: target_name,
                token: Some(token.clone()),
            },
        );
        links.notify(
            endpoint,
            TransportEvent::ConnectionInitiated {
                id: self.id.clone(),
                name: my_name,
                token: Some(token),
            },
        );
        Ok(())
    }

    fn accept_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let mut links = self.network.lock();
        let key = pair(&self.id, endpoint);
        let accepted = links
            .pending
            .get_mut(&key)
            .ok_or_else(|| TransportError::UnknownEndpoint(endpoint.clone()))?;
        accepted.insert(self.id.clone());
        if accepted.len() < 2 {
            return Ok(());
        }
        links.pending.remove(&key);
        links.connected.insert(key);
        debug!("{} <-> {} connected", self.id, endpoint);
        links.notify(
            &self.id,
            TransportEvent::ConnectionResult {
                id: endpoint.clone(),
                success: true,
            },
        );
        links.notify(
            endpoint,
            TransportEvent::ConnectionResult {
                id: self.id.clone(),
                success: true,
            },
        );
        Ok(())
    }

    fn reject_connection(&self, endpoint: &NeighborId) -> Result<(), TransportError> {
        let mut links = self.network.lock();
        if links.pending.remove(&pair(&self.id, endpoint)).is_none() {
            return Err(TransportError::UnknownEndpoint(endpoint.clone()));
        }
        links.notify(
            &self.id,
            TransportEvent::ConnectionResult {
                id: endpoint.clone(),
                success: false,
            },
        );
        links.notify(
            endpoint,
            TransportEvent::ConnectionResult {
                id: self.id.clone(),
                success: false,
            },
        );
        Ok(())
    }

    fn send_payload(
        &self,
        endpoint: &NeighborId,
        bytes: Vec<u8>,
    ) -> Result<PayloadId, TransportError> {
        let mut links = self.network.lock();
        if !links.connected.contains(&pair(&self.id, endpoint)) {
            return Err(TransportError::UnknownEndpoint(endpoint.clone()));
        }
        links.last_payload += 1;
        let payload_id = PayloadId(links.last_payload);
        debug!(
            "payload {} {} -> {}: {} bytes as {:?}",
            payload_id,
            self.id,
            endpoint,
            bytes.len(),
            PayloadKind::for_len(bytes.len())
        );
        links.notify(
            endpoint,
            TransportEvent::PayloadReceived {
                id: self.id.clone(),
                bytes,
            },
        );
        links.notify(
            &self.id,
            TransportEvent::PayloadTransferUpdate {
                payload_id,
                status: TransferStatus::Success,
            },
        );
        Ok(payload_id)
    }

    fn disconnect_all(&self) {
        let mut links = self.network.lock();
        if let Some(me) = links.endpoints.get_mut(&self.id) {
            me.advertising = None;
            me.discovering = None;
        }
        self.drop_links(&mut links);
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let mut links = self.network.lock();
        self.drop_links(&mut links);
        links.endpoints.remove(&self.id);
        debug!("{} left loopback", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const SERVICE: &str = "org.nearshare.pages";

    fn device(
        net: &Arc<LoopbackNetwork>,
        name: &str,
    ) -> (LoopbackTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (net.join(name, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn ids_are_four_alphanumerics() {
        let net = LoopbackNetwork::new();
        let (a, _ra) = device(&net, "A");
        let (b, _rb) = device(&net, "B");
        assert_eq!(a.id().as_str().len(), ENDPOINT_ID_LEN);
        assert!(a.id().as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.id(), b.id());
        assert_eq!(net.joined(), 2);
        drop(a);
        assert_eq!(net.joined(), 1);
    }

    #[test]
    fn discover_finds_existing_advertiser() {
        let net = LoopbackNetwork::new();
        let (a, _ra) = device(&net, "A");
        let (b, mut rb) = device(&net, "B");
        a.advertise("Alice", SERVICE).unwrap();
        b.discover(SERVICE).unwrap();
        assert_eq!(
            drain(&mut rb),
            vec![TransportEvent::EndpointFound {
                id: a.id().clone(),
                name: "Alice".into()
            }]
        );
    }

    #[test]
    fn both_sides_must_accept() {
        let net = LoopbackNetwork::new();
        let (a, mut ra) = device(&net, "Alice");
        let (b, mut rb) = device(&net, "Bob");
        a.advertise("Alice", SERVICE).unwrap();
        b.discover(SERVICE).unwrap();
        drain(&mut rb);
        b.request_connection(a.id()).unwrap();

        let token = pairing_token(a.id(), b.id());
        assert_eq!(
            drain(&mut ra),
            vec![TransportEvent::ConnectionInitiated {
                id: b.id().clone(),
                name: "Bob".into(),
                token: Some(token.clone()),
            }]
        );
        assert_eq!(drain(&mut rb).len(), 1);

        b.accept_connection(a.id()).unwrap();
        assert!(drain(&mut rb).is_empty());
        assert!(b.send_payload(a.id(), b"Ux".to_vec()).is_err());

        a.accept_connection(b.id()).unwrap();
        assert_eq!(
            drain(&mut ra),
            vec![TransportEvent::ConnectionResult {
                id: b.id().clone(),
                success: true
            }]
        );
        let pid = b.send_payload(a.id(), b"Ux".to_vec()).unwrap();
        assert_eq!(
            drain(&mut ra),
            vec![TransportEvent::PayloadReceived {
                id: b.id().clone(),
                bytes: b"Ux".to_vec()
            }]
        );
        assert!(drain(&mut rb).contains(&TransportEvent::PayloadTransferUpdate {
            payload_id: pid,
            status: TransferStatus::Success
        }));

        b.disconnect_all();
        assert_eq!(
            drain(&mut ra),
            vec![TransportEvent::Disconnected { id: b.id().clone() }]
        );
    }

    #[test]
    fn other_service_is_invisible() {
        let net = LoopbackNetwork::new();
        let (a, _ra) = device(&net, "A");
        let (b, mut rb) = device(&net, "B");
        let (c, mut rc) = device(&net, "C");
        b.discover("org.example.other").unwrap();
        c.discover(SERVICE).unwrap();
        a.advertise("Alice", SERVICE).unwrap();
        assert!(drain(&mut rb).is_empty());
        assert_eq!(
            drain(&mut rc),
            vec![TransportEvent::EndpointFound {
                id: a.id().clone(),
                name: "Alice".into()
            }]
        );

        a.stop_advertising();
        assert!(drain(&mut rb).is_empty());
        assert_eq!(
            drain(&mut rc),
            vec![TransportEvent::EndpointLost { id: a.id().clone() }]
        );
    }

    #[test]
    fn reject_fails_both_sides() {
        let net = LoopbackNetwork::new();
        let (a, mut ra) = device(&net, "Alice");
        let (b, mut rb) = device(&net, "Bob");
        a.advertise("Alice", SERVICE).unwrap();
        b.discover(SERVICE).unwrap();
        b.request_connection(a.id()).unwrap();
        drain(&mut ra);
        drain(&mut rb);

        a.reject_connection(b.id()).unwrap();
        assert_eq!(
            drain(&mut rb),
            vec![TransportEvent::ConnectionResult {
                id: a.id().clone(),
                success: false
            }]
        );
        assert_eq!(drain(&mut ra).len(), 1);
        assert!(b.accept_connection(a.id()).is_err());
    }

    #[test]
    fn request_to_non_advertiser_fails() {
        let net = LoopbackNetwork::new();
        let (a, _ra) = device(&net, "A");
        let (b, _rb) = device(&net, "B");
        assert_eq!(
            b.request_connection(a.id()),
            Err(TransportError::UnknownEndpoint(a.id().clone()))
        );
    }
}
