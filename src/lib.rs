//! # udp-impair
//!
//! UDP relay that impairs traffic between one client and an upstream peer.
//!
//! Delay and jitter are assigned from a sorted sample pool so the impairment
//! never reorders packets by accident; reordering is injected separately as an
//! exact, measurable number of adjacent swaps per direction.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   CLI / Config (clap, toml)                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  Impairment Event Loop (proxy)                  │
//! │   recv ─► classify ─► delay ─► reorder ─► capture ─► queue      │
//! ├──────────────────────┬──────────────────┬───────────────────────┤
//! │  Sorted Delay Pool   │ Reorder Control  │   Send Queue (heap)   │
//! ├──────────────────────┴──────────────────┴───────────────────────┤
//! │               Single UDP socket (tokio, current thread)         │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Pool indices come from fractional cursors
#![allow(clippy::cast_sign_loss)]            // Cursors and delays are never negative
#![allow(clippy::cast_precision_loss)]       // Acceptable for stats
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::too_many_arguments)]        // process() mirrors the datagram fields
#![allow(clippy::future_not_send)]           // Proxy runs on a current-thread runtime

pub mod capture;
pub mod config;
pub mod error;
pub mod impair;
pub mod proxy;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest datagram the relay will receive.
pub const MAX_DATAGRAM: usize = 65535;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capture::{CaptureLog, CaptureRecord, CaptureTarget};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::impair::{DelayModel, PendingSend, ReorderController, SendQueue};
    pub use crate::proxy::{ImpairProxy, RunReport, StopReason};
    pub use crate::types::*;
}
