pub mod controller;
pub mod protocol;
pub mod state;
mod turn;

pub use controller::{SessionController, SessionSummary};
pub use protocol::{FrameSink, InboundEvent, OutboundFrame};
pub use state::SessionStatus;
