//! Host wiring around ShareCore: a single inbox task serializes transport events, and observer
//! callbacks are forwarded to the UI over a channel so it can call back into the core freely.

use std::sync::Arc;
use std::time::Duration;

use nearshare_core::{
    ApplicationMessage, Config, ConnectionObserver, ConnectionState, NeighborId, PayloadId,
    ShareCore, TransportEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::loopback::LoopbackNetwork;

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Observer notification, as delivered to the UI task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    StateChanged(ConnectionState),
    MessageReceived {
        message: ApplicationMessage,
        from: NeighborId,
        from_name: Option<String>,
    },
    MessageDelivered(PayloadId),
    Error(String),
}

/// Forwards observer callbacks into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            trace!("ui channel closed");
        }
    }
}

impl ConnectionObserver for ChannelObserver {
    fn on_state_changed(&self, state: &ConnectionState) {
        self.forward(UiEvent::StateChanged(state.clone()));
    }

    fn on_message_received(
        &self,
        message: &ApplicationMessage,
        from: &NeighborId,
        from_name: Option<&str>,
    ) {
        self.forward(UiEvent::MessageReceived {
            message: message.clone(),
            from: from.clone(),
            from_name: from_name.map(str::to_string),
        });
    }

    fn on_message_delivered(&self, payload_id: PayloadId) {
        self.forward(UiEvent::MessageDelivered(payload_id));
    }

    fn on_error(&self, message: &str) {
        self.forward(UiEvent::Error(message.to_string()));
    }
}

/// Drain `rx` into `core` on one task, so transport callbacks are applied one at a time
/// and in arrival order. Ends when every sender is dropped.
pub fn spawn_inbox(
    core: Arc<ShareCore>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            core.handle_event(event);
        }
        debug!("event inbox closed");
    })
}

/// A ShareCore on a loopback network with its inbox running and a UI channel attached.
pub struct Device {
    pub core: Arc<ShareCore>,
    pub id: NeighborId,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    inbox: JoinHandle<()>,
}

impl Device {
    pub fn spawn(network: &Arc<LoopbackNetwork>, config: &Config) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = network.join(&config.endpoint_name, event_tx);
        let id = transport.id().clone();
        let core = Arc::new(ShareCore::new(Arc::new(transport), config));
        let (observer, ui) = ChannelObserver::new();
        core.register_observer(Arc::new(observer));
        let inbox = spawn_inbox(core.clone(), event_rx);
        Self {
            core,
            id,
            ui,
            inbox,
        }
    }

    /// Next UI event, or None if nothing arrives within `wait`.
    pub async fn next_ui(&mut self, wait: Duration) -> Option<UiEvent> {
        tokio::time::timeout(wait, self.ui.recv()).await.ok().flatten()
    }

    /// Skip UI events until one matches, returning it. None on timeout.
    pub async fn wait_for(
        &mut self,
        wait: Duration,
        mut pred: impl FnMut(&UiEvent) -> bool,
    ) -> Option<UiEvent> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_ui(left).await?;
            if pred(&event) {
                return Some(event);
            }
            trace!("{}: skipping {:?}", self.id, event);
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.inbox.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearshare_core::{Transport, TransportError};

    const WAIT: Duration = Duration::from_secs(2);

    fn config(name: &str, authentication: bool) -> Config {
        Config {
            endpoint_name: name.to_string(),
            authentication,
            ..Config::default()
        }
    }

    fn is_state(pred: impl Fn(&ConnectionState) -> bool) -> impl Fn(&UiEvent) -> bool {
        move |ev: &UiEvent| matches!(ev, UiEvent::StateChanged(s) if pred(s))
    }

    #[tokio::test]
    async fn loopback_session_end_to_end() {
        let net = LoopbackNetwork::new();
        let mut alice = Device::spawn(&net, &config("Alice", true));
        let mut bob = Device::spawn(&net, &config("Bob", true));

        alice.core.start_advertising().unwrap();
        bob.core.start_discovering().unwrap();

        let auth = |s: &ConnectionState| s.as_authenticating().is_some();
        let a_auth = alice.wait_for(WAIT, is_state(auth)).await.unwrap();
        let b_auth = bob.wait_for(WAIT, is_state(auth)).await.unwrap();
        let token = pairing_token_of(&a_auth);
        assert!(token.is_some());
        assert_eq!(token, pairing_token_of(&b_auth));
        assert_eq!(alice.core.state().neighbor_name(), Some("Bob"));

        alice.core.accept().unwrap();
        bob.core.accept().unwrap();
        let ready = |s: &ConnectionState| s.as_ready_to_send().is_some();
        alice.wait_for(WAIT, is_state(ready)).await.unwrap();
        bob.wait_for(WAIT, is_state(ready)).await.unwrap();
        assert_eq!(
            bob.core.state(),
            ConnectionState::ReadyToSend {
                neighbor_id: alice.id.clone(),
                neighbor_name: Some("Alice".into())
            }
        );

        let pid = bob.core.send_url("https://example.org/").unwrap();
        let got = alice
            .wait_for(WAIT, |ev| matches!(ev, UiEvent::MessageReceived { .. }))
            .await
            .unwrap();
        assert_eq!(
            got,
            UiEvent::MessageReceived {
                message: ApplicationMessage::Url("https://example.org/".into()),
                from: bob.id.clone(),
                from_name: Some("Bob".into()),
            }
        );
        assert_eq!(
            bob.wait_for(WAIT, |ev| matches!(ev, UiEvent::MessageDelivered(_)))
                .await,
            Some(UiEvent::MessageDelivered(pid))
        );
        bob.wait_for(WAIT, is_state(ready)).await.unwrap();

        bob.core.disconnect();
        alice
            .wait_for(WAIT, is_state(|s| *s == ConnectionState::Isolated))
            .await
            .unwrap();
        assert_eq!(bob.core.state(), ConnectionState::Isolated);
    }

    fn pairing_token_of(ev: &UiEvent) -> Option<String> {
        match ev {
            UiEvent::StateChanged(s) => s
                .as_authenticating()
                .and_then(|(_, _, t)| t.map(str::to_string)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn without_authentication_connects_directly() {
        let net = LoopbackNetwork::new();
        let mut alice = Device::spawn(&net, &config("Alice", false));
        let mut bob = Device::spawn(&net, &config("Bob", false));
        bob.core.start_discovering().unwrap();
        alice.core.start_advertising().unwrap();
        let ready = |s: &ConnectionState| s.as_ready_to_send().is_some();
        alice.wait_for(WAIT, is_state(ready)).await.unwrap();
        bob.wait_for(WAIT, is_state(ready)).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_pairing_fails_the_requester() {
        let net = LoopbackNetwork::new();
        let mut alice = Device::spawn(&net, &config("Alice", true));
        let mut bob = Device::spawn(&net, &config("Bob", true));
        alice.core.start_advertising().unwrap();
        bob.core.start_discovering().unwrap();

        let auth = |s: &ConnectionState| s.as_authenticating().is_some();
        alice.wait_for(WAIT, is_state(auth)).await.unwrap();
        bob.wait_for(WAIT, is_state(auth)).await.unwrap();

        alice.core.reject().unwrap();
        bob.wait_for(WAIT, is_state(|s| s.name() == "Failure"))
            .await
            .unwrap();
        assert_eq!(bob.core.state().name(), "Failure");
        assert!(bob.core.accept().is_err());

        // Alice's own failed result arrives after she is back to advertising.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(alice.core.state(), ConnectionState::Advertising);
        assert!(bob.core.start_discovering().is_ok());
    }

    #[tokio::test]
    async fn mismatched_service_ids_never_meet() {
        let net = LoopbackNetwork::new();
        let alice = Device::spawn(&net, &config("Alice", false));
        let mut bob = Device::spawn(
            &net,
            &Config {
                service_id: "org.example.other".into(),
                ..config("Bob", false)
            },
        );
        alice.core.start_advertising().unwrap();
        bob.core.start_discovering().unwrap();
        let connecting = |s: &ConnectionState| s.neighbor_id().is_some();
        assert_eq!(
            bob.wait_for(Duration::from_millis(200), is_state(connecting))
                .await,
            None
        );
        assert_eq!(bob.core.state(), ConnectionState::Discovering);
    }

    #[tokio::test]
    async fn inbox_applies_events_in_order() {
        struct Silent;
        impl Transport for Silent {
            fn advertise(&self, _: &str, _: &str) -> Result<(), TransportError> {
                Ok(())
            }
            fn discover(&self, _: &str) -> Result<(), TransportError> {
                Ok(())
            }
            fn stop_advertising(&self) {}
            fn stop_discovery(&self) {}
            fn request_connection(&self, _: &NeighborId) -> Result<(), TransportError> {
                Ok(())
            }
            fn accept_connection(&self, _: &NeighborId) -> Result<(), TransportError> {
                Ok(())
            }
            fn reject_connection(&self, _: &NeighborId) -> Result<(), TransportError> {
                Ok(())
            }
            fn send_payload(&self, _: &NeighborId, _: Vec<u8>) -> Result<PayloadId, TransportError> {
                Ok(PayloadId(1))
            }
            fn disconnect_all(&self) {}
        }

        let core = Arc::new(ShareCore::new(Arc::new(Silent), &config("Tab", false)));
        let (observer, mut ui) = ChannelObserver::new();
        core.register_observer(Arc::new(observer));
        core.start_discovering().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let inbox = spawn_inbox(core.clone(), rx);
        let ep = NeighborId::new("ep1");
        tx.send(TransportEvent::EndpointFound {
            id: ep.clone(),
            name: "Alice".into(),
        })
        .unwrap();
        tx.send(TransportEvent::ConnectionResult {
            id: ep.clone(),
            success: true,
        })
        .unwrap();
        tx.send(TransportEvent::PayloadReceived {
            id: ep.clone(),
            bytes: b"Uhttps://a.test".to_vec(),
        })
        .unwrap();
        drop(tx);
        inbox.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = ui.try_recv() {
            seen.push(ev);
        }
        assert_eq!(
            seen,
            vec![
                UiEvent::StateChanged(ConnectionState::Isolated),
                UiEvent::StateChanged(ConnectionState::Discovering),
                UiEvent::StateChanged(ConnectionState::Connecting {
                    neighbor_id: ep.clone(),
                    neighbor_name: "Alice".into()
                }),
                UiEvent::StateChanged(ConnectionState::ReadyToSend {
                    neighbor_id: ep.clone(),
                    neighbor_name: Some("Alice".into())
                }),
                UiEvent::MessageReceived {
                    message: ApplicationMessage::Url("https://a.test".into()),
                    from: ep,
                    from_name: Some("Alice".into()),
                },
            ]
        );
    }
}
