pub mod actor;
pub mod registry;
pub mod state;

pub use actor::{RelayPayload, RoomCommand};
pub use registry::{RoomHandle, RoomRegistry};
pub use state::Room;
