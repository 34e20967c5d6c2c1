//! Shutdown signal handling.
//!
//! SIGINT and SIGTERM both end the receive loop; the proxy then drains what
//! it has already accepted instead of exiting immediately.

use std::fmt;

use tracing::{error, info};

/// Signal that requested shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Terminate signal (SIGTERM).
    Terminate,
    /// Interrupt signal (SIGINT / Ctrl+C).
    Interrupt,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Wait for SIGINT or SIGTERM (Unix).
#[cfg(unix)]
pub async fn shutdown_signal() -> Signal {
    use futures::StreamExt;
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = match Signals::new([SIGTERM, SIGINT]) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to register signal handlers: {}", e);
            return ctrl_c().await;
        }
    };

    let signal = match signals.next().await {
        Some(SIGTERM) => Signal::Terminate,
        Some(_) => Signal::Interrupt,
        None => return ctrl_c().await,
    };
    signals.handle().close();

    info!("Received signal: {}", signal);
    signal
}

/// Wait for Ctrl+C (non-Unix fallback).
#[cfg(not(unix))]
pub async fn shutdown_signal() -> Signal {
    ctrl_c().await
}

async fn ctrl_c() -> Signal {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received signal: {}", Signal::Interrupt),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
    Signal::Interrupt
}
