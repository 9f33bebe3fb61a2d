//! Request/response channel to the browser extension that serializes the active page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nearshare_core::{ActionError, ApplicationMessage, PayloadId, ShareCore};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

/// Pending page requests by request id.
type PageWaiters = Arc<Mutex<HashMap<u64, oneshot::Sender<String>>>>;

/// Ask the extension to serialize the current page and answer with `complete(id, html)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("extension did not answer within {0:?}")]
    Timeout(Duration),
    #[error("extension bridge closed")]
    Closed,
    #[error("extension returned an empty page")]
    EmptyPage,
    #[error(transparent)]
    Send(#[from] ActionError),
}

#[derive(Clone)]
pub struct ExtensionBridge {
    requests: mpsc::UnboundedSender<PageRequest>,
    waiters: PageWaiters,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl ExtensionBridge {
    /// The receiver is the extension side: it gets one PageRequest per `request_page`.
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<PageRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            requests,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            timeout,
        };
        (bridge, rx)
    }

    /// Serialized HTML of the active page.
    pub async fn request_page(&self) -> Result<String, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut w = self.waiters.lock().await;
            w.insert(id, tx);
        }
        if self.requests.send(PageRequest { id }).is_err() {
            let _ = self.waiters.lock().await.remove(&id);
            return Err(BridgeError::Closed);
        }
        debug!("page request {} sent", id);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(html)) if html.trim().is_empty() => Err(BridgeError::EmptyPage),
            Ok(Ok(html)) => Ok(html),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                let _ = self.waiters.lock().await.remove(&id);
                warn!("page request {} timed out", id);
                Err(BridgeError::Timeout(self.timeout))
            }
        }
    }

    /// Deliver the extension's answer. Returns false if nobody is waiting for `id` any more.
    pub async fn complete(&self, id: u64, html: String) -> bool {
        let waiter = self.waiters.lock().await.remove(&id);
        match waiter {
            Some(tx) => tx.send(html).is_ok(),
            None => {
                debug!("late answer for page request {}", id);
                false
            }
        }
    }
}

/// Fetch the active page from the extension and send it to the connected peer.
pub async fn share_current_page(
    core: &ShareCore,
    bridge: &ExtensionBridge,
) -> Result<PayloadId, BridgeError> {
    let html = bridge.request_page().await?;
    Ok(core.send_message(ApplicationMessage::Page(html))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn times_out_without_answer() {
        let (bridge, _ext) = ExtensionBridge::new(Duration::from_millis(5000));
        let err = bridge.request_page().await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_millis(5000)));
        assert!(!bridge.complete(1, "<p>late</p>".into()).await);
    }

    #[tokio::test]
    async fn answered_request() {
        let (bridge, mut ext) = ExtensionBridge::new(Duration::from_secs(5));
        let answering = bridge.clone();
        tokio::spawn(async move {
            while let Some(req) = ext.recv().await {
                answering.complete(req.id, "<h1>Hi</h1>".into()).await;
            }
        });
        assert_eq!(bridge.request_page().await.unwrap(), "<h1>Hi</h1>");
        assert_eq!(bridge.request_page().await.unwrap(), "<h1>Hi</h1>");
    }

    #[tokio::test]
    async fn empty_page_and_closed_extension() {
        let (bridge, mut ext) = ExtensionBridge::new(Duration::from_secs(5));
        let answering = bridge.clone();
        let task = tokio::spawn(async move {
            if let Some(req) = ext.recv().await {
                answering.complete(req.id, "  ".into()).await;
            }
        });
        assert!(matches!(
            bridge.request_page().await,
            Err(BridgeError::EmptyPage)
        ));
        task.await.unwrap();
        assert!(matches!(
            bridge.request_page().await,
            Err(BridgeError::Closed)
        ));
    }

    #[tokio::test]
    async fn sharing_requires_a_connection() {
        let net = crate::loopback::LoopbackNetwork::new();
        let (events, _inbox) = mpsc::unbounded_channel();
        let core = ShareCore::new(
            Arc::new(net.join("Tab", events)),
            &nearshare_core::Config::default(),
        );
        let (bridge, mut ext) = ExtensionBridge::new(Duration::from_secs(5));
        let answering = bridge.clone();
        tokio::spawn(async move {
            while let Some(req) = ext.recv().await {
                answering.complete(req.id, "<p>x</p>".into()).await;
            }
        });
        let err = share_current_page(&core, &bridge).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Send(ActionError::UnexpectedState {
                actual: "Isolated",
                ..
            })
        ));
    }
}
