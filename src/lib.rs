#![allow(warnings)]
pub mod config;
pub mod coordinator;
pub mod metrics;
pub mod monitoring;
pub mod room;
pub mod signaling;
pub mod utils;

// Re-export main types for convenience
pub use config::{CoordinatorConfig, ServerConfig};
pub use coordinator::{SessionCoordinator, SignalingChannel};
pub use room::RoomRegistry;
pub use signaling::SignalingServer;
pub use utils::{Error, Result};
