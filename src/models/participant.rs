use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A member of the room roster, keyed by `user_id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: ParticipantRole,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Creator,
    Participant,
}
