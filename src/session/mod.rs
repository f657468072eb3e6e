pub mod clock;
pub mod composer;
pub mod controller;

pub use clock::{remaining, Remaining, SessionClock, WARNING_THRESHOLD_MS};
pub use composer::{MessageComposer, QueuedAttachment, TYPING_EXPIRY_MS};
pub use controller::{RoomSession, SessionPhase};
