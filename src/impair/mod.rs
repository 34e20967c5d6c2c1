//! Impairment engine: delay assignment, controlled reordering and the send
//! queue that holds scheduled datagrams until they are due.
//!
//! ```text
//! datagram ─► DelayModel::sample ─► ReorderController::process ─► SendQueue
//!                                        ▲        │ (0, 1 or 2 sends)
//!                      release_idle/flush┘        ▼
//!                                             capture log
//! ```

mod delay;
mod queue;
mod reorder;

pub use delay::{delay_duration, DelayDistribution, DelayModel};
pub use queue::{PendingSend, SendQueue};
pub use reorder::{DirectionStats, ReorderController, ReorderStats};
