use chrono::{DateTime, Duration, Utc};

use crate::models::{AttachmentMeta, MessageKind, OutgoingMessage};

/// How long a typing indicator stays live without another keystroke
pub const TYPING_EXPIRY_MS: i64 = 3_000;

/// Local composer state: draft text, queued attachments, recording flag and
/// the typing deadline. Submission is fire-and-forget — the draft clears
/// immediately and the correlation id on the produced message is what ties
/// the optimistic render to its confirmed counterpart.
#[derive(Debug, Default)]
pub struct MessageComposer {
    draft: String,
    attachments: Vec<QueuedAttachment>,
    recording: bool,
    typing_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct QueuedAttachment {
    pub kind: MessageKind,
    pub meta: AttachmentMeta,
}

impl MessageComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Build the outgoing text message and clear the draft. Returns `None`
    /// for an empty or whitespace-only draft.
    pub fn submit(&mut self) -> Option<OutgoingMessage> {
        let content = self.draft.trim().to_string();
        if content.is_empty() {
            return None;
        }
        self.draft.clear();
        self.typing_deadline = None;
        Some(OutgoingMessage::text(content))
    }

    pub fn queue_attachment(&mut self, kind: MessageKind, meta: AttachmentMeta) {
        self.attachments.push(QueuedAttachment { kind, meta });
    }

    pub fn attachments(&self) -> &[QueuedAttachment] {
        &self.attachments
    }

    /// Drain the attachment queue into one outgoing message per attachment,
    /// mirroring how shared files are sent individually.
    pub fn take_attachments(&mut self) -> Vec<OutgoingMessage> {
        self.attachments
            .drain(..)
            .map(|queued| {
                let content = queued
                    .meta
                    .name
                    .as_deref()
                    .map(|name| format!("Shared {}", name))
                    .unwrap_or_default();
                OutgoingMessage::with_attachment(queued.kind, content, queued.meta)
            })
            .collect()
    }

    pub fn begin_recording(&mut self) {
        self.recording = true;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Stop recording and produce the voice message
    pub fn finish_recording(&mut self, duration_seconds: u32) -> OutgoingMessage {
        self.recording = false;
        OutgoingMessage::with_attachment(
            MessageKind::Voice,
            String::new(),
            AttachmentMeta {
                duration_seconds: Some(duration_seconds),
                ..Default::default()
            },
        )
    }

    pub fn cancel_recording(&mut self) {
        self.recording = false;
    }

    /// Arm (or re-arm) the typing deadline
    pub fn note_typing(&mut self, now: DateTime<Utc>) {
        self.typing_deadline = Some(now + Duration::milliseconds(TYPING_EXPIRY_MS));
    }

    pub fn typing_expired(&self, now: DateTime<Utc>) -> bool {
        match self.typing_deadline {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }
}
