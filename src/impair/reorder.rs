//! Controlled reordering.
//!
//! Each direction runs a one-packet pipeline: the controller holds the most
//! recent packet until the next one arrives, so that on a reorder tick there
//! are always two candidates to swap. Every `interval`-th packet swaps with
//! its held predecessor; all other packets leave in arrival order, never
//! earlier than the direction's floor.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::delay::delay_duration;
use super::queue::PendingSend;
use crate::config::ReorderConfig;
use crate::types::{Direction, PerDirection};

/// Per-direction reorder counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirectionStats {
    /// Packets processed.
    pub total: u64,
    /// Adjacent swaps performed.
    pub reordered: u64,
}

impl DirectionStats {
    /// Swaps as a percentage of processed packets.
    pub fn reorder_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.reordered as f64 / self.total as f64 * 100.0
        }
    }
}

/// Reorder counters for both directions.
pub type ReorderStats = PerDirection<DirectionStats>;

#[derive(Debug)]
struct DirectionState {
    /// Scheduled time of the last finalized send.
    floor: Option<Instant>,
    /// Packet waiting for a partner.
    held: Option<PendingSend>,
    count: u64,
    last_receive: Instant,
}

impl DirectionState {
    fn new(now: Instant) -> Self {
        Self {
            floor: None,
            held: None,
            count: 0,
            last_receive: now,
        }
    }

    fn clamp_to_floor(&self, at: Instant) -> Instant {
        self.floor.map_or(at, |floor| at.max(floor))
    }

    /// Finalize the held packet at its time or the floor, whichever is later.
    fn release_held(&mut self) -> Option<PendingSend> {
        let mut held = self.held.take()?;
        held.scheduled_at = self.clamp_to_floor(held.scheduled_at);
        self.floor = Some(held.scheduled_at);
        Some(held)
    }
}

/// Injects a deterministic rate of adjacent swaps per direction.
#[derive(Debug)]
pub struct ReorderController {
    interval: u64,
    min_gap: Duration,
    idle_timeout: Duration,
    states: PerDirection<Option<DirectionState>>,
    stats: ReorderStats,
}

impl ReorderController {
    pub fn new(config: &ReorderConfig) -> Self {
        let rate = config.rate.max(0.0);
        let interval = if rate > 0.0 {
            (1.0 / rate).round_ties_even() as u64
        } else {
            0
        };

        Self {
            interval,
            min_gap: config.min_gap,
            idle_timeout: config.idle_timeout,
            states: PerDirection::default(),
            stats: ReorderStats::default(),
        }
    }

    /// Packets per forced swap (0 = reordering disabled).
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Schedule a received packet.
    ///
    /// Returns the sends that became final, in the order they should be
    /// enqueued: nothing (packet held), the previously held packet, or on a
    /// reorder tick the new packet followed by the held one.
    pub fn process(
        &mut self,
        direction: Direction,
        received_at: Instant,
        natural_delay_ms: f64,
        payload: Bytes,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> Vec<PendingSend> {
        let interval = self.interval;
        let min_gap = self.min_gap;
        self.stats[direction].total += 1;

        let state = self.states[direction].get_or_insert_with(|| DirectionState::new(received_at));
        state.count += 1;
        state.last_receive = received_at;

        let natural = received_at + delay_duration(natural_delay_ms);
        let scheduled_at = match state.floor {
            Some(floor) if natural < floor => floor + min_gap,
            _ => natural,
        };
        let send = PendingSend {
            scheduled_at,
            natural_delay_ms,
            payload,
            source,
            destination,
        };

        if interval == 0 {
            state.floor = Some(scheduled_at);
            return vec![send];
        }

        let Some(mut held) = state.held.take() else {
            state.held = Some(send);
            return Vec::new();
        };

        if state.count % interval == 0 {
            held.scheduled_at = (scheduled_at + min_gap).max(held.scheduled_at);
            state.floor = Some(held.scheduled_at);
            self.stats[direction].reordered += 1;
            return vec![send, held];
        }

        held.scheduled_at = state.clamp_to_floor(held.scheduled_at);
        state.floor = Some(held.scheduled_at);
        state.held = Some(send);
        vec![held]
    }

    /// Release the held packet of `direction`, if any.
    pub fn flush(&mut self, direction: Direction) -> Option<PendingSend> {
        self.states[direction].as_mut()?.release_held()
    }

    /// Release held packets whose direction has been silent for at least
    /// the idle timeout.
    pub fn release_idle(&mut self, now: Instant) -> Vec<(Direction, PendingSend)> {
        let idle_timeout = self.idle_timeout;
        let mut released = Vec::new();

        for direction in Direction::ALL {
            let Some(state) = self.states[direction].as_mut() else {
                continue;
            };
            if state.held.is_none()
                || now.saturating_duration_since(state.last_receive) < idle_timeout
            {
                continue;
            }
            if let Some(send) = state.release_held() {
                debug!(%direction, "Released idle packet");
                released.push((direction, send));
            }
        }

        released
    }

    /// Earliest time at which a held packet must be force-released.
    pub fn next_idle_deadline(&self) -> Option<Instant> {
        Direction::ALL
            .into_iter()
            .filter_map(|direction| self.states[direction].as_ref())
            .filter(|state| state.held.is_some())
            .map(|state| state.last_receive + self.idle_timeout)
            .min()
    }

    /// Whether `direction` currently holds a packet.
    pub fn is_holding(&self, direction: Direction) -> bool {
        self.states[direction]
            .as_ref()
            .is_some_and(|state| state.held.is_some())
    }

    pub fn stats(&self) -> ReorderStats {
        self.stats
    }
}
