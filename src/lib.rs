//! Authoritative fixed-tick simulation with lag-compensated hit-scan
//!
//! Network tasks feed decoded input into [`game::ingress::InputIngress`]; the
//! [`game::TickScheduler`] owns all simulation state and advances it one tick at a time.

pub mod app;
pub mod config;
pub mod game;
pub mod net;
pub mod util;
