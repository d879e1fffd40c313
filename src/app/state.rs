//! Server state shared between network tasks

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::game::ingress::InputIngress;
use crate::game::types::Tick;
use crate::net::session::SessionRegistry;

/// Cross-thread handles; everything else belongs to the simulation task
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub ingress: Arc<InputIngress>,
    pub sessions: Arc<SessionRegistry>,
    /// Last tick published by the scheduler, for `welcome`
    pub current_tick: Arc<AtomicU32>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            ingress: Arc::new(InputIngress::new()),
            sessions: Arc::new(SessionRegistry::new()),
            current_tick: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn tick(&self) -> Tick {
        self.current_tick.load(Ordering::Relaxed)
    }
}
