//! Rooms, wire events and event dispatch for live connections.

pub mod events;
pub mod hub;
pub mod rooms;
pub mod router;

pub use events::{ClientEvent, FeedbackInput, SenderClaim, ServerEvent};
pub use hub::{Broadcaster, EventSender, RoomHub};
pub use rooms::Room;
pub use router::{ConnectionContext, EventRouter};
