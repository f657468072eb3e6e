use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::AuthSession;
use crate::error::{ClientError, Result};
use crate::gateway::RoomGateway;
use crate::models::{
    ChatMessage, DeliveryState, OutgoingMessage, Participant, Room, RoomStatus,
};
use crate::realtime::SubscriptionManager;
use crate::session::clock::{Remaining, SessionClock};

/// Where the session is in its lifecycle
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Unloaded,
    Loading,
    Ready,
    Leaving,
    Failed(ClientError),
}

impl SessionPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionPhase::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SessionPhase::Loading)
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            SessionPhase::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Everything the session owns. Mutated only by the controller; accessors
/// hand out clones.
struct SessionState {
    phase: SessionPhase,
    room_id: Option<String>,
    room: Option<Room>,
    participants: Vec<Participant>,
    messages: Vec<ChatMessage>,
    /// Correlation ids of optimistic placeholders awaiting confirmation
    pending: HashSet<String>,
    /// Inserts that arrived between subscribe and snapshot completion
    buffered: Vec<ChatMessage>,
    degraded: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Unloaded,
            room_id: None,
            room: None,
            participants: Vec::new(),
            messages: Vec::new(),
            pending: HashSet::new(),
            buffered: Vec::new(),
            degraded: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Merge a confirmed message row into the list. Duplicates by id are
    /// dropped; a row matching a pending correlation id replaces the
    /// optimistic placeholder in place instead of appending.
    fn merge_insert(&mut self, incoming: ChatMessage) {
        if self.messages.iter().any(|m| m.id == incoming.id) {
            return;
        }

        if let Some(corr) = incoming.correlation_id.clone() {
            if self.pending.remove(&corr) {
                let placeholder = self.messages.iter().position(|m| {
                    m.correlation_id.as_deref() == Some(corr.as_str())
                        && m.delivery != DeliveryState::Delivered
                });
                if let Some(pos) = placeholder {
                    let mut confirmed = incoming;
                    confirmed.delivery = DeliveryState::Delivered;
                    self.messages[pos] = confirmed;
                    return;
                }
            }
        }

        self.messages.push(incoming);
    }
}

enum Departure {
    Leave,
    Terminate,
}

/// Orchestrates one room session: loads the snapshot, keeps local state in
/// sync with realtime events, reconciles optimistic sends and owns the
/// countdown clock. Collaborators are injected so tests can substitute
/// doubles for the backend and the realtime transport.
pub struct RoomSession {
    gateway: Arc<RoomGateway>,
    subscriptions: Arc<SubscriptionManager>,
    auth: Arc<AuthSession>,
    message_page_size: usize,
    state: Arc<Mutex<SessionState>>,
    /// Cleared on close; every async resolution checks it before touching
    /// state so nothing mutates after the owning view is gone.
    alive: Arc<AtomicBool>,
    disposers: Mutex<Vec<crate::realtime::Disposer>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    clock: Mutex<Option<SessionClock>>,
    phase_tx: Arc<watch::Sender<SessionPhase>>,
    revision_tx: Arc<watch::Sender<u64>>,
}

impl RoomSession {
    pub fn new(
        gateway: Arc<RoomGateway>,
        subscriptions: Arc<SubscriptionManager>,
        auth: Arc<AuthSession>,
        message_page_size: usize,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Unloaded);
        let (revision_tx, _) = watch::channel(0u64);

        Self {
            gateway,
            subscriptions,
            auth,
            message_page_size,
            state: Arc::new(Mutex::new(SessionState::new())),
            alive: Arc::new(AtomicBool::new(true)),
            disposers: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            clock: Mutex::new(None),
            phase_tx: Arc::new(phase_tx),
            revision_tx: Arc::new(revision_tx),
        }
    }

    /// Enter a room: subscribe, snapshot, replay, `Ready`.
    ///
    /// Subscriptions open before the snapshot fetch so an insert landing in
    /// between is buffered rather than lost; the buffer is replayed (deduped
    /// against the snapshot) before the phase flips to `Ready`.
    pub async fn enter(&self, room_id: &str) -> Result<()> {
        self.auth.require()?;

        {
            let mut s = self.state.lock().unwrap();
            match s.phase {
                SessionPhase::Loading | SessionPhase::Ready => {
                    if s.room_id.as_deref() == Some(room_id) {
                        // Double-entry guard
                        return Ok(());
                    }
                    return Err(ClientError::Validation(
                        "Another room session is active; leave it first".to_string(),
                    ));
                }
                SessionPhase::Leaving => {
                    return Err(ClientError::Validation(
                        "Session is shutting down".to_string(),
                    ));
                }
                _ => {}
            }
            s.reset();
            s.room_id = Some(room_id.to_string());
            s.phase = SessionPhase::Loading;
        }
        self.publish_phase();

        tracing::info!(room_id = %room_id, "Entering room");
        self.open_subscriptions(room_id).await;

        let (snapshot, page) = tokio::join!(
            self.gateway.fetch_room_snapshot(room_id),
            self.gateway
                .fetch_messages(room_id, self.message_page_size, 0),
        );

        if !self.alive.load(Ordering::SeqCst) {
            // The view unmounted while we were fetching; discard everything.
            self.teardown_realtime();
            return Ok(());
        }

        let (snapshot, page) = match (snapshot, page) {
            (Ok(snapshot), Ok(page)) => (snapshot, page),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(room_id = %room_id, error = %e, "Failed to load room");
                self.teardown_realtime();
                {
                    let mut s = self.state.lock().unwrap();
                    if s.phase.is_loading() {
                        s.phase = SessionPhase::Failed(e.clone());
                    }
                }
                self.publish_phase();
                return Err(e);
            }
        };

        let expires_at = snapshot.room.expires_at;
        {
            let mut s = self.state.lock().unwrap();
            if !s.phase.is_loading() {
                // Closed mid-flight
                self.teardown_realtime();
                return Ok(());
            }
            s.room = Some(snapshot.room);
            s.participants = snapshot
                .participants
                .into_iter()
                .filter(|p| p.is_active)
                .collect();
            s.messages = page;
            let buffered = std::mem::take(&mut s.buffered);
            for msg in buffered {
                s.merge_insert(msg);
            }
            s.phase = SessionPhase::Ready;
        }
        *self.clock.lock().unwrap() = Some(SessionClock::start(expires_at));
        self.publish_phase();
        self.bump();

        tracing::info!(room_id = %room_id, "Room session ready");
        Ok(())
    }

    /// Send a message. An optimistic placeholder renders immediately; the
    /// gateway response or the realtime echo confirms it. On failure the
    /// placeholder stays, marked `Failed`, so the caller can offer resend.
    pub async fn send_message(&self, outgoing: OutgoingMessage) -> Result<()> {
        let identity = self.auth.require()?;

        let room_id = {
            let mut s = self.state.lock().unwrap();
            if !s.phase.is_ready() {
                return Err(ClientError::Validation(
                    "No active room session".to_string(),
                ));
            }
            let room_id = s.room_id.clone().expect("ready session has a room id");
            let placeholder = ChatMessage::placeholder(&outgoing, &identity, &room_id, Utc::now());
            s.messages.push(placeholder);
            s.pending.insert(outgoing.correlation_id.clone());
            room_id
        };
        self.bump();

        self.dispatch(&room_id, &outgoing).await
    }

    /// Retry a message whose placeholder is marked `Failed`. The original
    /// correlation id is reused so the eventual echo still reconciles.
    pub async fn resend(&self, correlation_id: &str) -> Result<()> {
        self.auth.require()?;

        let (room_id, outgoing) = {
            let mut s = self.state.lock().unwrap();
            if !s.phase.is_ready() {
                return Err(ClientError::Validation(
                    "No active room session".to_string(),
                ));
            }
            let room_id = s.room_id.clone().expect("ready session has a room id");
            let message = s
                .messages
                .iter_mut()
                .find(|m| {
                    m.correlation_id.as_deref() == Some(correlation_id)
                        && m.delivery == DeliveryState::Failed
                })
                .ok_or_else(|| {
                    ClientError::Validation("No failed message to resend".to_string())
                })?;
            message.delivery = DeliveryState::Sending;
            let outgoing = OutgoingMessage {
                correlation_id: correlation_id.to_string(),
                kind: message.kind,
                content: message.content.clone(),
                attachment: message.attachment.clone(),
                reply_to: message.reply_to.clone(),
            };
            s.pending.insert(correlation_id.to_string());
            (room_id, outgoing)
        };
        self.bump();

        self.dispatch(&room_id, &outgoing).await
    }

    async fn dispatch(&self, room_id: &str, outgoing: &OutgoingMessage) -> Result<()> {
        match self.gateway.send_message(room_id, outgoing).await {
            Ok(stored) => {
                if self.alive.load(Ordering::SeqCst) {
                    let mut s = self.state.lock().unwrap();
                    s.merge_insert(stored);
                    drop(s);
                    self.bump();
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Message send failed");
                if self.alive.load(Ordering::SeqCst) {
                    let mut s = self.state.lock().unwrap();
                    if let Some(m) = s
                        .messages
                        .iter_mut()
                        .find(|m| m.correlation_id.as_deref() == Some(&outgoing.correlation_id))
                    {
                        m.delivery = DeliveryState::Failed;
                    }
                    drop(s);
                    self.bump();
                }
                Err(e)
            }
        }
    }

    /// Leave the room. Subscriptions are disposed first; the gateway call is
    /// best-effort and never blocks the transition to `Unloaded`.
    pub async fn leave(&self) {
        self.depart(Departure::Leave).await;
    }

    /// Creator variant of [`leave`](Self::leave) that terminates the room
    /// for everyone.
    pub async fn terminate(&self) {
        self.depart(Departure::Terminate).await;
    }

    async fn depart(&self, mode: Departure) {
        let room_id = {
            let mut s = self.state.lock().unwrap();
            if matches!(s.phase, SessionPhase::Unloaded | SessionPhase::Leaving) {
                return;
            }
            s.phase = SessionPhase::Leaving;
            s.room_id.clone()
        };
        self.publish_phase();
        self.teardown_realtime();

        if let Some(room_id) = room_id {
            let result = match mode {
                Departure::Leave => self.gateway.leave_room(&room_id).await,
                Departure::Terminate => self.gateway.terminate_room(&room_id).await,
            };
            if let Err(e) = result {
                tracing::warn!(room_id = %room_id, error = %e, "Departure call failed; leaving anyway");
            }
        }

        self.state.lock().unwrap().reset();
        self.publish_phase();
        self.bump();
    }

    /// Synchronous teardown for unmount. Disposes subscriptions first and
    /// guarantees no in-flight resolution mutates state afterwards.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.teardown_realtime();
        self.state.lock().unwrap().reset();
        self.publish_phase();
    }

    /// Extend the room's lifetime (creator action); retargets the countdown.
    pub async fn extend(&self, additional_minutes: i64) -> Result<DateTime<Utc>> {
        let room_id = self.ready_room_id()?;
        let expires_at = self.gateway.extend_room(&room_id, additional_minutes).await?;

        if self.alive.load(Ordering::SeqCst) {
            {
                let mut s = self.state.lock().unwrap();
                if let Some(room) = s.room.as_mut() {
                    room.expires_at = expires_at;
                }
            }
            if let Some(clock) = self.clock.lock().unwrap().as_ref() {
                clock.retarget(expires_at);
            }
            self.bump();
        }
        Ok(expires_at)
    }

    /// Lock the room against new joins (creator action).
    pub async fn lock(&self, reason: Option<&str>) -> Result<()> {
        let room_id = self.ready_room_id()?;
        self.gateway.lock_room(&room_id, reason).await?;
        self.set_room_status(RoomStatus::Locked);
        Ok(())
    }

    pub async fn unlock(&self) -> Result<()> {
        let room_id = self.ready_room_id()?;
        self.gateway.unlock_room(&room_id).await?;
        self.set_room_status(RoomStatus::Active);
        Ok(())
    }

    // ==================== Accessors ====================

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().unwrap().phase.clone()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    /// Bumped on every state mutation; UI layers use it as a re-render signal.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    pub fn room(&self) -> Option<Room> {
        self.state.lock().unwrap().room.clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.state.lock().unwrap().participants.clone()
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().unwrap().participants.len()
    }

    /// True when a realtime channel was lost or never established; the UI
    /// surfaces this as a "may miss live updates" indicator.
    pub fn live_updates_degraded(&self) -> bool {
        self.state.lock().unwrap().degraded
    }

    /// Shared countdown for every UI timer; `None` before `Ready`
    pub fn countdown(&self) -> Option<watch::Receiver<Option<Remaining>>> {
        self.clock.lock().unwrap().as_ref().map(|c| c.subscribe())
    }

    pub fn remaining(&self) -> Option<Remaining> {
        self.clock.lock().unwrap().as_ref().and_then(|c| c.current())
    }

    // ==================== Internals ====================

    async fn open_subscriptions(&self, room_id: &str) {
        let on_insert = {
            let state = self.state.clone();
            let alive = self.alive.clone();
            let revision = self.revision_tx.clone();
            move |msg: ChatMessage| {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                let mut s = state.lock().unwrap();
                let applied = match s.phase {
                    SessionPhase::Loading => {
                        s.buffered.push(msg);
                        false
                    }
                    SessionPhase::Ready => {
                        s.merge_insert(msg);
                        true
                    }
                    _ => false,
                };
                drop(s);
                if applied {
                    revision.send_modify(|r| *r += 1);
                }
            }
        };

        match self
            .subscriptions
            .subscribe_messages(room_id, on_insert, self.degraded_marker())
            .await
        {
            Ok(disposer) => self.track_disposer(disposer),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Message subscription failed");
                self.mark_degraded();
            }
        }

        // Participant events only carry the changed row; re-fetch the roster
        // (and with it the room metadata) for each one, serialized so two
        // events mean two fetches and the newest snapshot always wins.
        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<()>();
        let refresher = {
            let gateway = self.gateway.clone();
            let state = self.state.clone();
            let alive = self.alive.clone();
            let revision = self.revision_tx.clone();
            let room_id = room_id.to_string();
            tokio::spawn(async move {
                while refresh_rx.recv().await.is_some() {
                    match gateway.fetch_room_snapshot(&room_id).await {
                        Ok(snapshot) => {
                            if !alive.load(Ordering::SeqCst) {
                                break;
                            }
                            let mut s = state.lock().unwrap();
                            if !s.phase.is_ready() {
                                continue;
                            }
                            s.room = Some(snapshot.room);
                            s.participants = snapshot
                                .participants
                                .into_iter()
                                .filter(|p| p.is_active)
                                .collect();
                            drop(s);
                            revision.send_modify(|r| *r += 1);
                        }
                        Err(e) => {
                            tracing::warn!(room_id = %room_id, error = %e, "Roster refresh failed");
                        }
                    }
                }
            })
        };
        self.tasks.lock().unwrap().push(refresher);

        let on_change = move |_event| {
            let _ = refresh_tx.send(());
        };
        match self
            .subscriptions
            .subscribe_participants(room_id, on_change, self.degraded_marker())
            .await
        {
            Ok(disposer) => self.track_disposer(disposer),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Participant subscription failed");
                self.mark_degraded();
            }
        }
    }

    fn track_disposer(&self, disposer: crate::realtime::Disposer) {
        self.disposers.lock().unwrap().push(disposer);
        // close() may have drained the list while the subscribe was in
        // flight; anything pushed after that must be disposed right away.
        if !self.alive.load(Ordering::SeqCst) {
            self.teardown_realtime();
        }
    }

    fn degraded_marker(&self) -> impl FnOnce() + Send + 'static {
        let state = self.state.clone();
        let revision = self.revision_tx.clone();
        move || {
            let mut s = state.lock().unwrap();
            s.degraded = true;
            drop(s);
            revision.send_modify(|r| *r += 1);
        }
    }

    fn mark_degraded(&self) {
        self.state.lock().unwrap().degraded = true;
        self.bump();
    }

    fn teardown_realtime(&self) {
        for disposer in self.disposers.lock().unwrap().drain(..) {
            disposer.dispose();
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        *self.clock.lock().unwrap() = None;
    }

    fn ready_room_id(&self) -> Result<String> {
        let s = self.state.lock().unwrap();
        if !s.phase.is_ready() {
            return Err(ClientError::Validation(
                "No active room session".to_string(),
            ));
        }
        Ok(s.room_id.clone().expect("ready session has a room id"))
    }

    fn set_room_status(&self, status: RoomStatus) {
        if !self.alive.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut s = self.state.lock().unwrap();
            if let Some(room) = s.room.as_mut() {
                room.status = status;
            }
        }
        self.bump();
    }

    fn publish_phase(&self) {
        let phase = self.state.lock().unwrap().phase.clone();
        let _ = self.phase_tx.send(phase);
    }

    fn bump(&self) {
        self.revision_tx.send_modify(|r| *r += 1);
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        for disposer in self.disposers.lock().unwrap().drain(..) {
            disposer.dispose();
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}
