// NearShare host: runs two loopback devices through a complete share session.

mod bridge;
mod config;
mod loopback;
mod runtime;

use std::time::Duration;

use anyhow::Context;
use nearshare_core::{ApplicationMessage, Config, ConnectionState};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bridge::{share_current_page, ExtensionBridge};
use crate::loopback::LoopbackNetwork;
use crate::runtime::{Device, UiEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_URL: &str = "https://example.org/";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let mut url = None;
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("nearshare-host {}", VERSION);
            return Ok(());
        }
        if arg.starts_with('-') {
            anyhow::bail!("unknown option {arg}; usage: nearshare-host [--version] [URL]");
        }
        url = Some(arg);
    }

    let cfg = config::load().context("loading config")?;
    init_tracing(&cfg.log_filter);
    let url = url.unwrap_or_else(|| DEFAULT_URL.to_string());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            r = run_demo(&cfg, &url) => r,
            r = shutdown_signal() => {
                info!("interrupted");
                r
            }
        }
    })
}

/// RUST_LOG wins over the configured filter.
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn is_authenticating(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::StateChanged(s) if s.as_authenticating().is_some())
}

fn is_ready(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::StateChanged(s) if s.as_ready_to_send().is_some())
}

fn is_received(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::MessageReceived { .. })
}

fn is_delivered(ev: &UiEvent) -> bool {
    matches!(ev, UiEvent::MessageDelivered(_))
}

/// One device advertises, the other discovers; both confirm the pairing, then the
/// discoverer shares the URL and the page and hangs up.
async fn run_demo(cfg: &Config, url: &str) -> anyhow::Result<()> {
    let network = LoopbackNetwork::new();
    let receiver_cfg = Config {
        endpoint_name: format!("{}-receiver", cfg.endpoint_name),
        ..cfg.clone()
    };
    let mut receiver = Device::spawn(&network, &receiver_cfg);
    let mut sender = Device::spawn(&network, cfg);

    receiver.core.start_advertising()?;
    sender.core.start_discovering()?;

    if cfg.authentication {
        for device in [&mut receiver, &mut sender] {
            let ev = device
                .wait_for(STEP_TIMEOUT, is_authenticating)
                .await
                .context("no pairing request")?;
            if let UiEvent::StateChanged(ConnectionState::Authenticating {
                neighbor_name,
                token,
                ..
            }) = ev
            {
                info!(
                    "{}: pair with {} using code {}?",
                    device.core.local_name(),
                    neighbor_name,
                    token.as_deref().unwrap_or("(none)")
                );
            }
            device.core.accept()?;
        }
    }
    for device in [&mut receiver, &mut sender] {
        device
            .wait_for(STEP_TIMEOUT, is_ready)
            .await
            .context("connection not established")?;
    }
    info!("connected: {}", sender.core.state());

    sender.core.send_url(url)?;
    report(&mut receiver).await?;
    sender
        .wait_for(STEP_TIMEOUT, is_delivered)
        .await
        .context("url not confirmed")?;
    sender
        .wait_for(STEP_TIMEOUT, is_ready)
        .await
        .context("sender stuck after url")?;

    let (bridge, mut extension) = ExtensionBridge::new(cfg.page_request_timeout());
    let answering = bridge.clone();
    let page_url = url.to_string();
    tokio::spawn(async move {
        while let Some(req) = extension.recv().await {
            let html = format!(
                "<html><head><title>{page_url}</title></head><body><a href=\"{page_url}\">{page_url}</a></body></html>"
            );
            answering.complete(req.id, html).await;
        }
    });
    share_current_page(&sender.core, &bridge).await?;
    report(&mut receiver).await?;
    sender
        .wait_for(STEP_TIMEOUT, is_delivered)
        .await
        .context("page not confirmed")?;

    sender.core.disconnect();
    receiver
        .wait_for(STEP_TIMEOUT, |ev| {
            matches!(ev, UiEvent::StateChanged(ConnectionState::Isolated))
        })
        .await
        .context("receiver did not see the disconnect")?;
    info!("session finished");
    Ok(())
}

async fn report(receiver: &mut Device) -> anyhow::Result<()> {
    let ev = receiver
        .wait_for(STEP_TIMEOUT, is_received)
        .await
        .context("nothing received")?;
    if let UiEvent::MessageReceived {
        message,
        from,
        from_name,
    } = ev
    {
        let from = from_name.unwrap_or_else(|| from.to_string());
        match message {
            ApplicationMessage::Url(url) => info!("received url from {}: {}", from, url),
            ApplicationMessage::Page(html) => {
                info!("received page from {} ({} bytes)", from, html.len())
            }
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
