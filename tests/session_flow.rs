//! End-to-end tests for the room-session lifecycle against in-memory
//! doubles of the backend RPC and the realtime transport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use tempchat_client::auth::{AuthSession, Identity};
use tempchat_client::error::{ClientError, Result};
use tempchat_client::gateway::BackendRpc;
use tempchat_client::models::{CreateRoomParams, DeliveryState};
use tempchat_client::realtime::{EventKind, RealtimeEvent, RealtimeTransport, SubscriptionManager};
use tempchat_client::{ClientContext, Config};

// ==================== Doubles ====================

struct RoomFixture {
    id: String,
    name: String,
    code: String,
}

/// Backend double: one pre-seeded room plus whatever `create_secure_room`
/// adds. Snapshot reads can be gated to model slow fetches.
struct FakeBackend {
    rooms: Mutex<Vec<RoomFixture>>,
    participants: Mutex<Vec<Value>>,
    messages: Mutex<Vec<Value>>,
    snapshot_gate: Mutex<Option<Arc<Notify>>>,
    snapshot_selects: AtomicUsize,
    insert_failures: AtomicUsize,
    failing_calls: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeBackend {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            rooms: Mutex::new(vec![RoomFixture {
                id: "room-1".to_string(),
                name: "Standup".to_string(),
                code: "ROOM00000000001".to_string(),
            }]),
            participants: Mutex::new(vec![
                participant_row("u1", "Alice", "creator", true),
                participant_row("u2", "Bob", "participant", true),
                participant_row("u3", "Carol", "participant", false),
            ]),
            messages: Mutex::new(vec![
                message_row("m1", "first", now - chrono::Duration::minutes(2), None),
                message_row("m2", "second", now - chrono::Duration::minutes(1), None),
            ]),
            snapshot_gate: Mutex::new(None),
            snapshot_selects: AtomicUsize::new(0),
            insert_failures: AtomicUsize::new(0),
            failing_calls: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    fn gate_next_snapshot(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.snapshot_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn fail_next_insert(&self) {
        self.insert_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn fail_calls_to(&self, function: &str) {
        self.failing_calls.lock().unwrap().insert(function.to_string());
    }

    fn add_participant(&self, user_id: &str, name: &str) {
        self.participants
            .lock()
            .unwrap()
            .push(participant_row(user_id, name, "participant", true));
    }

    fn calls_to(&self, function: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == function)
            .count()
    }

    fn room_row(&self, room_id: &str) -> Option<Value> {
        let rooms = self.rooms.lock().unwrap();
        let room = rooms.iter().find(|r| r.id == room_id)?;
        Some(json!({
            "id": room.id,
            "room_name": room.name,
            "room_code": room.code,
            "encryption_level": "high",
            "max_participants": 10,
            "created_at": Utc::now() - chrono::Duration::minutes(5),
            "expires_at": Utc::now() + chrono::Duration::minutes(30),
            "room_status": "active",
            "creator": { "id": "u1", "full_name": "Alice" },
            "participants": *self.participants.lock().unwrap(),
        }))
    }
}

fn participant_row(user_id: &str, name: &str, role: &str, is_active: bool) -> Value {
    json!({
        "role": role,
        "is_active": is_active,
        "joined_at": Utc::now() - chrono::Duration::minutes(3),
        "user": { "id": user_id, "full_name": name, "avatar_url": null }
    })
}

fn message_row(
    id: &str,
    content: &str,
    created_at: chrono::DateTime<Utc>,
    client_ref: Option<&str>,
) -> Value {
    json!({
        "id": id,
        "room_id": "room-1",
        "sender": { "id": "u1", "full_name": "Alice" },
        "message_type": "text",
        "content": content,
        "created_at": created_at,
        "client_ref": client_ref,
    })
}

#[async_trait]
impl BackendRpc for FakeBackend {
    async fn call(&self, function: &str, args: Value) -> Result<Value> {
        self.calls.lock().unwrap().push(function.to_string());
        if self.failing_calls.lock().unwrap().contains(function) {
            return Err(ClientError::Network("connection reset".to_string()));
        }

        match function {
            "create_secure_room" => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let room = RoomFixture {
                    id: format!("room-{}", 100 + n),
                    name: args["room_name_param"].as_str().unwrap_or("Room").to_string(),
                    code: format!("ROOM{:011}", n),
                };
                let response = json!([{
                    "room_id": room.id,
                    "room_code": room.code,
                    "room_link": format!("https://tempchat.app/join/{}", room.code),
                    "expires_at": Utc::now()
                        + chrono::Duration::minutes(args["duration_minutes_param"].as_i64().unwrap_or(30)),
                }]);
                self.rooms.lock().unwrap().push(room);
                Ok(response)
            }
            "join_room" => {
                let code = args["room_code_param"].as_str().unwrap_or_default();
                let rooms = self.rooms.lock().unwrap();
                Ok(match rooms.iter().find(|r| r.code == code) {
                    Some(room) => json!([{
                        "success": true,
                        "message": "Joined",
                        "room_id": room.id,
                        "room_name": room.name,
                    }]),
                    None => json!([{ "success": false, "message": "Room not found" }]),
                })
            }
            "leave_room" | "terminate_room" | "lock_room" | "unlock_room" => Ok(Value::Null),
            "extend_room" => Ok(json!([{
                "expires_at": Utc::now()
                    + chrono::Duration::minutes(args["additional_minutes_param"].as_i64().unwrap_or(0) + 30),
            }])),
            other => Err(ClientError::Backend(format!("Unknown function {}", other))),
        }
    }

    async fn select(&self, resource: &str, query: &[(&str, String)]) -> Result<Value> {
        match resource {
            "secure_rooms" => {
                let gate = self.snapshot_gate.lock().unwrap().take();
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                self.snapshot_selects.fetch_add(1, Ordering::SeqCst);

                let room_id = query
                    .iter()
                    .find(|(k, _)| *k == "id")
                    .map(|(_, v)| v.trim_start_matches("eq.").to_string())
                    .unwrap_or_default();
                Ok(match self.room_row(&room_id) {
                    Some(row) => json!([row]),
                    None => json!([]),
                })
            }
            "messages" => {
                // Newest-first, the way the backend serves pages.
                let mut rows = self.messages.lock().unwrap().clone();
                rows.reverse();
                Ok(Value::Array(rows))
            }
            other => Err(ClientError::Backend(format!("Unknown resource {}", other))),
        }
    }

    async fn insert(&self, _resource: &str, row: Value) -> Result<Value> {
        if self.insert_failures.load(Ordering::SeqCst) > 0 {
            self.insert_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(ClientError::Network("insert failed".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = json!({
            "id": format!("srv-{}", n),
            "room_id": row["room_id"],
            "sender": { "id": row["sender_id"], "full_name": "Alice" },
            "message_type": row["message_type"],
            "content": row["content"],
            "created_at": Utc::now(),
            "client_ref": row["client_ref"],
        });
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

/// Realtime double: events are emitted straight into open channels.
#[derive(Default)]
struct FakeTransport {
    channels: DashMap<String, mpsc::UnboundedSender<RealtimeEvent>>,
}

impl FakeTransport {
    fn emit_message_insert(&self, room_id: &str, payload: Value) {
        let channel = SubscriptionManager::message_channel(room_id);
        if let Some(route) = self.channels.get(&channel) {
            let _ = route.send(RealtimeEvent {
                channel: channel.clone(),
                kind: EventKind::Insert,
                payload,
            });
        }
    }

    fn emit_participant_change(&self, room_id: &str) {
        let channel = SubscriptionManager::participant_channel(room_id);
        if let Some(route) = self.channels.get(&channel) {
            let _ = route.send(RealtimeEvent {
                channel: channel.clone(),
                kind: EventKind::Update,
                payload: json!({ "room_id": room_id }),
            });
        }
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn open(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<RealtimeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.insert(channel.to_string(), tx);
        Ok(rx)
    }

    fn close(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

// ==================== Harness ====================

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        backend_url: "http://localhost".to_string(),
        api_key: "test-key".to_string(),
        realtime_url: "ws://localhost/realtime".to_string(),
        message_page_size: 50,
        request_timeout_seconds: 5,
        recent_rooms_path: dir.path().join("recent.json"),
    }
}

struct Harness {
    context: ClientContext,
    backend: Arc<FakeBackend>,
    transport: Arc<FakeTransport>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let transport = Arc::new(FakeTransport::default());
    let auth = Arc::new(AuthSession::signed_in(Identity {
        user_id: "u1".to_string(),
        display_name: "Alice".to_string(),
        avatar_url: None,
        access_token: "token".to_string(),
    }));
    let context = ClientContext::new(
        test_config(&dir),
        auth,
        backend.clone() as Arc<dyn BackendRpc>,
        transport.clone() as Arc<dyn RealtimeTransport>,
    );
    Harness {
        context,
        backend,
        transport,
        _dir: dir,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ==================== Tests ====================

#[tokio::test]
async fn test_enter_reaches_ready_with_snapshot() {
    let h = harness();
    let session = h.context.session();

    session.enter("room-1").await.expect("Should enter room");

    assert!(session.phase().is_ready());
    let room = session.room().expect("Room cached");
    assert_eq!(room.name, "Standup");

    // Snapshot page comes back ascending and the inactive participant is
    // filtered out of the roster.
    let messages = session.messages();
    assert_eq!(
        messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m1", "m2"]
    );
    assert_eq!(session.participant_count(), 2);
    assert!(session.remaining().is_some());

    session.leave().await;
    assert!(matches!(
        session.phase(),
        tempchat_client::session::SessionPhase::Unloaded
    ));
}

#[tokio::test]
async fn test_double_entry_is_noop() {
    let h = harness();
    let session = h.context.session();

    session.enter("room-1").await.unwrap();
    let selects = h.backend.snapshot_selects.load(Ordering::SeqCst);

    session.enter("room-1").await.unwrap();
    assert_eq!(h.backend.snapshot_selects.load(Ordering::SeqCst), selects);

    // A different room while this one is live is an explicit error.
    let err = session.enter("room-2").await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn test_enter_unknown_room_fails_with_redirect_discriminant() {
    let h = harness();
    let session = h.context.session();

    let err = session.enter("room-404").await.unwrap_err();
    assert!(err.redirects_to_join_screen());
    assert!(session.phase().error().is_some());
}

#[tokio::test]
async fn test_realtime_inserts_append_in_order() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    for (id, content) in [("m3", "third"), ("m4", "fourth")] {
        h.transport
            .emit_message_insert("room-1", message_row(id, content, Utc::now(), None));
    }
    settle().await;

    let ids: Vec<String> = session.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn test_optimistic_send_reconciles_with_echo() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    let outgoing = tempchat_client::models::OutgoingMessage::text("hello room");
    let corr = outgoing.correlation_id.clone();
    session.send_message(outgoing).await.expect("Send succeeds");

    // The direct response already confirmed the placeholder; the realtime
    // echo of the same row must not duplicate it.
    let stored_id = {
        let messages = session.messages();
        let confirmed = messages
            .iter()
            .find(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
            .expect("Confirmed message present");
        assert_eq!(confirmed.delivery, DeliveryState::Delivered);
        confirmed.id.clone()
    };
    h.transport.emit_message_insert(
        "room-1",
        message_row(&stored_id, "hello room", Utc::now(), Some(&corr)),
    );
    settle().await;

    let matching = session
        .messages()
        .iter()
        .filter(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
        .count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn test_late_echo_confirms_failed_placeholder() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    let outgoing = tempchat_client::models::OutgoingMessage::text("ping");
    let corr = outgoing.correlation_id.clone();

    h.backend.fail_next_insert();
    let _ = session.send_message(outgoing).await;

    // The insert "failed" on the wire but actually landed server-side, so
    // its echo still arrives; it must replace the failed placeholder.
    h.transport.emit_message_insert(
        "room-1",
        message_row("srv-echo", "ping", Utc::now(), Some(&corr)),
    );
    settle().await;

    let messages = session.messages();
    let matching: Vec<_> = messages
        .iter()
        .filter(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].id, "srv-echo");
    assert_eq!(matching[0].delivery, DeliveryState::Delivered);
}

#[tokio::test]
async fn test_failed_send_is_kept_and_resendable() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    h.backend.fail_next_insert();
    let outgoing = tempchat_client::models::OutgoingMessage::text("flaky");
    let corr = outgoing.correlation_id.clone();

    let err = session.send_message(outgoing).await.unwrap_err();
    assert!(matches!(err, ClientError::Network(_)));

    {
        let messages = session.messages();
        let placeholder = messages
            .iter()
            .find(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
            .expect("Placeholder kept after failure");
        assert_eq!(placeholder.delivery, DeliveryState::Failed);
    }

    session.resend(&corr).await.expect("Resend succeeds");
    let messages = session.messages();
    let confirmed = messages
        .iter()
        .find(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
        .unwrap();
    assert_eq!(confirmed.delivery, DeliveryState::Delivered);
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.correlation_id.as_deref() == Some(corr.as_str()))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_events_during_loading_are_buffered_and_replayed() {
    let h = harness();
    let session = Arc::new(h.context.session());

    let gate = h.backend.gate_next_snapshot();
    let entering = tokio::spawn({
        let session = session.clone();
        async move { session.enter("room-1").await }
    });
    settle().await;
    assert!(session.phase().is_loading());

    // One event duplicates a snapshot row, one is genuinely new; both land
    // while the snapshot fetch is still blocked.
    h.transport
        .emit_message_insert("room-1", message_row("m2", "second", Utc::now(), None));
    h.transport
        .emit_message_insert("room-1", message_row("m3", "third", Utc::now(), None));
    settle().await;

    gate.notify_one();
    entering.await.unwrap().expect("Enter succeeds");

    let ids: Vec<String> = session.messages().iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_close_before_snapshot_discards_everything() {
    let h = harness();
    let session = Arc::new(h.context.session());

    let gate = h.backend.gate_next_snapshot();
    let entering = tokio::spawn({
        let session = session.clone();
        async move { session.enter("room-1").await }
    });
    settle().await;

    session.close();
    gate.notify_one();
    entering.await.unwrap().expect("Abandoned enter is not an error");

    assert!(matches!(
        session.phase(),
        tempchat_client::session::SessionPhase::Unloaded
    ));
    assert!(session.messages().is_empty());
    assert!(session.room().is_none());
    assert!(h.transport.channels.is_empty());
}

#[tokio::test]
async fn test_participant_events_trigger_one_refetch_each() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();
    assert_eq!(h.backend.snapshot_selects.load(Ordering::SeqCst), 1);
    assert_eq!(session.participant_count(), 2);

    h.backend.add_participant("u4", "Dave");
    h.transport.emit_participant_change("room-1");
    settle().await;
    h.transport.emit_participant_change("room-1");
    settle().await;

    assert_eq!(h.backend.snapshot_selects.load(Ordering::SeqCst), 3);
    assert_eq!(session.participant_count(), 3);
}

#[tokio::test]
async fn test_transport_loss_sets_degraded_flag() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();
    assert!(!session.live_updates_degraded());

    // Dropping every channel sender models the realtime connection dying.
    h.transport.channels.clear();
    settle().await;

    assert!(session.live_updates_degraded());
    assert!(session.phase().is_ready());
}

#[tokio::test]
async fn test_leave_is_best_effort() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    h.backend.fail_calls_to("leave_room");
    session.leave().await;

    assert!(matches!(
        session.phase(),
        tempchat_client::session::SessionPhase::Unloaded
    ));
    assert_eq!(h.backend.calls_to("leave_room"), 1);
    assert!(h.transport.channels.is_empty());
}

#[tokio::test]
async fn test_terminate_calls_backend_and_unloads() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    session.terminate().await;

    assert_eq!(h.backend.calls_to("terminate_room"), 1);
    assert!(matches!(
        session.phase(),
        tempchat_client::session::SessionPhase::Unloaded
    ));
}

#[tokio::test]
async fn test_create_then_join_round_trip() {
    let h = harness();

    let params = CreateRoomParams {
        name: "Standup".to_string(),
        duration_minutes: 15,
        max_participants: 5,
        ..Default::default()
    };
    let created = h.context.gateway.create_room(&params).await.unwrap();
    assert_eq!(created.room_code.len(), 15);

    // Joining with the freshly issued code, typed sloppily, finds the room.
    let sloppy = format!(
        "{}-{}-{}-{}-{}",
        &created.room_code[0..3].to_lowercase(),
        &created.room_code[3..6],
        &created.room_code[6..9].to_lowercase(),
        &created.room_code[9..12],
        &created.room_code[12..15],
    );
    let joined = h.context.gateway.join_room(&sloppy, None).await.unwrap();
    assert_eq!(joined.room_id, created.room_id);
}

#[tokio::test]
async fn test_extend_moves_expiry_forward() {
    let h = harness();
    let session = h.context.session();
    session.enter("room-1").await.unwrap();

    let before = session.room().unwrap().expires_at;
    let after = session.extend(15).await.expect("Extend succeeds");

    assert!(after > before);
    assert_eq!(session.room().unwrap().expires_at, after);
}
