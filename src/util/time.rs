//! Time utilities for the fixed-tick simulation

use std::time::{Duration, Instant};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const TICKS_PER_SECOND: u32 = 30; // 30 ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / TICKS_PER_SECOND as u64;

/// Wall-clock period of one tick
pub fn tick_period() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

/// Calculate delta time for physics (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / TICKS_PER_SECOND as f32
}

/// Convert seconds to a whole number of ticks (at least one)
pub fn secs_to_ticks(secs: f32) -> u32 {
    ((secs * TICKS_PER_SECOND as f32).round() as u32).max(1)
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
