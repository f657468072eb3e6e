pub mod message;
pub mod participant;
pub mod room;

pub use message::{
    AttachmentMeta, ChatMessage, DeliveryState, MessageKind, OutgoingMessage, SenderInfo,
};
pub use participant::{Participant, ParticipantRole};
pub use room::{
    CreateRoomParams, CreatedRoom, EncryptionLevel, JoinedRoom, Room, RoomSnapshot, RoomStatus,
    ALLOWED_PARTICIPANT_LIMITS, MAX_DURATION_MINUTES, MAX_ROOM_NAME_CHARS, MIN_DURATION_MINUTES,
};
