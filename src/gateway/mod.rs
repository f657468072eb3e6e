pub mod rpc;

pub use rpc::{BackendRpc, HttpRpc};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthSession;
use crate::error::{ClientError, JoinRejection, Result};
use crate::models::{
    ChatMessage, CreateRoomParams, CreatedRoom, JoinedRoom, OutgoingMessage, Participant,
    ParticipantRole, Room, RoomSnapshot, SenderInfo, ALLOWED_PARTICIPANT_LIMITS,
    MAX_DURATION_MINUTES, MAX_ROOM_NAME_CHARS, MIN_DURATION_MINUTES,
};

/// Expected length of a room code once separators are stripped
pub const ROOM_CODE_LENGTH: usize = 15;

/// Wraps the backend's room RPCs and table reads behind a typed API. All
/// client-side validation happens here, before any network call, and all
/// backend failures are normalized into the crate's error taxonomy.
pub struct RoomGateway {
    rpc: Arc<dyn BackendRpc>,
    auth: Arc<AuthSession>,
}

impl RoomGateway {
    pub fn new(rpc: Arc<dyn BackendRpc>, auth: Arc<AuthSession>) -> Self {
        Self { rpc, auth }
    }

    /// Create a new secure room. Never retried: creation is not idempotent.
    pub async fn create_room(&self, params: &CreateRoomParams) -> Result<CreatedRoom> {
        self.auth.require()?;

        let name = params.name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Room name is required".to_string()));
        }
        if name.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err(ClientError::Validation(format!(
                "Room name must be at most {} characters",
                MAX_ROOM_NAME_CHARS
            )));
        }
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&params.duration_minutes) {
            return Err(ClientError::Validation(format!(
                "Duration must be between {} and {} minutes",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
            )));
        }
        if !ALLOWED_PARTICIPANT_LIMITS.contains(&params.max_participants) {
            return Err(ClientError::Validation(format!(
                "Participant limit must be one of {:?}",
                ALLOWED_PARTICIPANT_LIMITS
            )));
        }

        let args = json!({
            "room_name_param": name,
            "room_type_param": params.room_type,
            "encryption_level_param": params.encryption_level,
            "is_password_protected_param": params.password.is_some(),
            "password_param": params.password,
            "max_participants_param": params.max_participants,
            "duration_minutes_param": params.duration_minutes,
            "advanced_settings_param": params.advanced_settings,
        });

        let row = first_row(
            self.rpc
                .call("create_secure_room", args)
                .await
                .map_err(|e| match e {
                    ClientError::Backend(msg) => ClientError::RoomCreation(msg),
                    other => other,
                })?,
        )?;

        let created: CreatedRoom = serde_json::from_value(row)?;
        tracing::info!(room_id = %created.room_id, "Room created");
        Ok(created)
    }

    /// Join a room by its public code. The code is validated client-side
    /// (mirroring the server rule) so malformed input never costs a round
    /// trip; backend refusals come back as typed `JoinRejected` errors.
    pub async fn join_room(&self, code: &str, password: Option<&str>) -> Result<JoinedRoom> {
        self.auth.require()?;
        let code = validate_room_code(code)?;

        let args = json!({
            "room_code_param": code,
            "password_param": password,
        });

        let row = first_row(self.rpc.call("join_room", args).await?)?;
        let outcome: JoinRow = serde_json::from_value(row)?;

        if !outcome.success {
            let message = outcome
                .message
                .unwrap_or_else(|| "Failed to join room".to_string());
            return Err(ClientError::JoinRejected {
                reason: classify_rejection(&message),
                message,
            });
        }

        match (outcome.room_id, outcome.room_name) {
            (Some(room_id), Some(room_name)) => {
                tracing::info!(room_id = %room_id, "Joined room");
                Ok(JoinedRoom { room_id, room_name })
            }
            _ => Err(ClientError::Backend(
                "Join response missing room identity".to_string(),
            )),
        }
    }

    /// Mark the current user as having left the room. Best-effort: callers
    /// never block navigation on this succeeding.
    pub async fn leave_room(&self, room_id: &str) -> Result<()> {
        self.auth.require()?;
        self.rpc
            .call("leave_room", json!({ "room_id_param": room_id }))
            .await?;
        tracing::info!(room_id = %room_id, "Left room");
        Ok(())
    }

    /// Terminate the room (creator only). Best-effort, like `leave_room`.
    pub async fn terminate_room(&self, room_id: &str) -> Result<()> {
        self.auth.require()?;
        self.rpc
            .call("terminate_room", json!({ "room_id_param": room_id }))
            .await?;
        tracing::info!(room_id = %room_id, "Room terminated");
        Ok(())
    }

    /// Extend the room's lifetime (creator only); the backend caps the total
    /// duration. Returns the new expiry.
    pub async fn extend_room(
        &self,
        room_id: &str,
        additional_minutes: i64,
    ) -> Result<DateTime<Utc>> {
        self.auth.require()?;
        if additional_minutes <= 0 {
            return Err(ClientError::Validation(
                "Extension must be a positive number of minutes".to_string(),
            ));
        }

        let args = json!({
            "room_id_param": room_id,
            "additional_minutes_param": additional_minutes,
        });

        let row = first_row(self.rpc.call("extend_room", args).await?)?;
        let extended: ExtendRow = serde_json::from_value(row)?;
        tracing::info!(room_id = %room_id, expires_at = %extended.expires_at, "Room extended");
        Ok(extended.expires_at)
    }

    /// Lock the room against new joins (creator only).
    pub async fn lock_room(&self, room_id: &str, reason: Option<&str>) -> Result<()> {
        self.auth.require()?;
        let args = json!({
            "room_id_param": room_id,
            "reason_param": reason,
        });
        self.rpc.call("lock_room", args).await?;
        tracing::info!(room_id = %room_id, "Room locked");
        Ok(())
    }

    pub async fn unlock_room(&self, room_id: &str) -> Result<()> {
        self.auth.require()?;
        self.rpc
            .call("unlock_room", json!({ "room_id_param": room_id }))
            .await?;
        tracing::info!(room_id = %room_id, "Room unlocked");
        Ok(())
    }

    /// Room metadata with nested creator and active participants
    pub async fn fetch_room_snapshot(&self, room_id: &str) -> Result<RoomSnapshot> {
        self.auth.require()?;

        let query = [
            ("id", format!("eq.{}", room_id)),
            (
                "select",
                "*,creator:user_profiles(id,full_name,avatar_url),\
                 participants:room_participants(role,is_active,joined_at,\
                 user:user_profiles(id,full_name,avatar_url))"
                    .to_string(),
            ),
        ];

        let rows = self.rpc.select("secure_rooms", &query).await?;
        let row = first_row(rows)
            .map_err(|_| ClientError::NotFound(format!("Room {} not found", room_id)))?;

        let snapshot: SnapshotRow = serde_json::from_value(row)?;
        Ok(RoomSnapshot {
            room: snapshot.room,
            creator: snapshot.creator,
            participants: snapshot
                .participants
                .into_iter()
                .map(Participant::from)
                .collect(),
        })
    }

    /// One page of messages, ascending by creation time. The backend serves
    /// the page newest-first; the reversal happens here, not in callers.
    pub async fn fetch_messages(
        &self,
        room_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.auth.require()?;

        let query = [
            ("room_id", format!("eq.{}", room_id)),
            ("is_deleted", "eq.false".to_string()),
            (
                "select",
                "*,sender:user_profiles(id,full_name,avatar_url)".to_string(),
            ),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];

        let rows = self.rpc.select("messages", &query).await?;
        let mut messages: Vec<ChatMessage> = serde_json::from_value(rows)?;
        messages.reverse();
        Ok(messages)
    }

    /// Insert a message and return the stored row with the sender joined.
    /// The correlation id travels with the row so the realtime echo can be
    /// matched against the optimistic placeholder.
    pub async fn send_message(
        &self,
        room_id: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<ChatMessage> {
        let identity = self.auth.require()?;

        let row = json!({
            "room_id": room_id,
            "sender_id": identity.user_id,
            "message_type": outgoing.kind,
            "content": outgoing.content,
            "attachment_metadata": outgoing.attachment,
            "reply_to_id": outgoing.reply_to,
            "client_ref": outgoing.correlation_id,
        });

        let stored = first_row(self.rpc.insert("messages", row).await?)?;
        Ok(serde_json::from_value(stored)?)
    }
}

/// Strip separators and case-normalize a room code as typed by the user.
pub fn normalize_room_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Normalized code, or `Validation` when the format rule fails. Mirrors the
/// server-side rule: exactly 15 characters from [A-Z0-9].
pub fn validate_room_code(input: &str) -> Result<String> {
    let code = normalize_room_code(input);
    if code.len() != ROOM_CODE_LENGTH {
        return Err(ClientError::Validation(format!(
            "Room code must be {} characters",
            ROOM_CODE_LENGTH
        )));
    }
    Ok(code)
}

/// The one place backend refusal text is interpreted; everything downstream
/// switches on the resulting discriminant.
fn classify_rejection(message: &str) -> JoinRejection {
    let message = message.to_ascii_lowercase();
    if message.contains("password") {
        JoinRejection::WrongPassword
    } else if message.contains("full") || message.contains("capacity") {
        JoinRejection::RoomFull
    } else if message.contains("locked") {
        JoinRejection::RoomLocked
    } else if message.contains("expired") {
        JoinRejection::Expired
    } else if message.contains("not found") || message.contains("no longer exists") {
        JoinRejection::NotFound
    } else {
        JoinRejection::Other
    }
}

/// RPC results arrive either as a bare object or a single-row array.
fn first_row(value: Value) -> Result<Value> {
    match value {
        Value::Array(mut rows) => {
            if rows.is_empty() {
                Err(ClientError::Backend("Empty response".to_string()))
            } else {
                Ok(rows.remove(0))
            }
        }
        Value::Null => Err(ClientError::Backend("Empty response".to_string())),
        other => Ok(other),
    }
}

#[derive(Debug, Deserialize)]
struct JoinRow {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    room_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtendRow {
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SnapshotRow {
    #[serde(flatten)]
    room: Room,
    #[serde(default)]
    creator: Option<SenderInfo>,
    #[serde(default)]
    participants: Vec<ParticipantRow>,
}

#[derive(Debug, Deserialize)]
struct ParticipantRow {
    role: ParticipantRole,
    is_active: bool,
    joined_at: DateTime<Utc>,
    user: SenderInfo,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            user_id: row.user.id,
            display_name: row.user.display_name,
            avatar_url: row.user.avatar_url,
            role: row.role,
            is_active: row.is_active,
            joined_at: row.joined_at,
        }
    }
}
