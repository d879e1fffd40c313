//! Game simulation modules

pub mod broadcast;
pub mod collaborators;
pub mod combat;
pub mod context;
pub mod deadlines;
pub mod history;
pub mod ingress;
pub mod player;
pub mod replication;
pub mod rewind;
pub mod scheduler;
pub mod types;
pub mod world;

pub use context::{SimError, SimulationContext};
pub use scheduler::{SchedulerBuilder, StartupError, TickReport, TickScheduler};
