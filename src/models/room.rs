use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Participant, SenderInfo};

/// Bounds enforced client-side before the creation RPC is attempted.
pub const MAX_ROOM_NAME_CHARS: usize = 50;
pub const MIN_DURATION_MINUTES: i64 = 5;
pub const MAX_DURATION_MINUTES: i64 = 60;
pub const ALLOWED_PARTICIPANT_LIMITS: [u32; 5] = [2, 5, 10, 20, 50];

/// Room metadata as stored by the backend. The client holds a read-through
/// cache of this per active session and evicts it on expiry or termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(rename = "room_name")]
    pub name: String,
    pub room_code: String,
    pub encryption_level: EncryptionLevel,
    pub max_participants: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "room_status")]
    pub status: RoomStatus,
}

impl Room {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Room lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Active,
    Locked,
    Terminated,
}

/// Advisory encryption tag carried by the room; no client-side cryptography
/// is derived from it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionLevel {
    High,
    Medium,
    Low,
}

/// Parameters for the room-creation RPC
#[derive(Debug, Clone)]
pub struct CreateRoomParams {
    pub name: String,
    pub room_type: String,
    pub encryption_level: EncryptionLevel,
    pub password: Option<String>,
    pub max_participants: u32,
    pub duration_minutes: i64,
    pub advanced_settings: serde_json::Value,
}

impl Default for CreateRoomParams {
    fn default() -> Self {
        Self {
            name: "Secure Chat Room".to_string(),
            room_type: "private".to_string(),
            encryption_level: EncryptionLevel::High,
            password: None,
            max_participants: 10,
            duration_minutes: 30,
            advanced_settings: serde_json::json!({}),
        }
    }
}

/// Response after creating a room
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedRoom {
    pub room_id: String,
    pub room_code: String,
    pub room_link: String,
    pub expires_at: DateTime<Utc>,
}

/// Response after a successful join
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub room_id: String,
    pub room_name: String,
}

/// Initial full read of room metadata and roster on entry
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room: Room,
    pub creator: Option<SenderInfo>,
    pub participants: Vec<Participant>,
}
