pub mod messages;
pub mod server;

pub use messages::{ClientMessage, DisplayProfile, Participant, ServerMessage, StatePatch};
pub use server::SignalingServer;
