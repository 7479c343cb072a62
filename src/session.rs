//! The streaming consumer: one conversation, the typing flag, and the error
//! banner, kept consistent while a reply streams in.
//!
//! A send runs in two halves. [`Session::begin_send`] records the user
//! message and the empty assistant placeholder; [`stream_reply`] talks to the
//! backend and reports what happened as [`StreamEvent`]s, which are folded
//! back in with [`Session::apply`]. The TUI runs the second half on a
//! background task; [`Session::send`] runs both halves inline.

use futures_util::StreamExt;

use crate::client::{ChatTransport, SendError};
use crate::decoder::{DecodeMode, Utf8Decoder};
use crate::state::{ChatRole, Conversation};

/// Progress of one streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Newly decoded text (possibly empty when a chunk only held part of a character)
    Chunk(String),
    Done,
    Failed(SendError),
}

/// A send accepted by [`Session::begin_send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Events tagged with any other id are stale and get dropped
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct Session {
    conversation: Conversation,
    is_typing: bool,
    error: Option<String>,
    decode_mode: DecodeMode,
    /// Full reply text received so far for the in-flight send
    reply: String,
    send_id: u64,
    revision: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decode_mode(decode_mode: DecodeMode) -> Self {
        Self {
            decode_mode,
            ..Self::default()
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode
    }

    /// Bumped on every change to the conversation or the flags.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Record the user's message and open the assistant placeholder.
    ///
    /// Blank input and sends made while a reply is streaming are rejected
    /// without touching anything.
    pub fn begin_send(&mut self, input: &str) -> Result<Outgoing, SendError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SendError::EmptyInput);
        }
        if self.is_typing {
            return Err(SendError::Busy);
        }

        self.error = None;
        self.conversation.append_message(ChatRole::User, text)?;
        self.is_typing = true;
        self.conversation.open_reply()?;
        self.reply.clear();
        self.send_id += 1;
        self.touch();

        Ok(Outgoing {
            id: self.send_id,
            text: text.to_string(),
        })
    }

    /// Fold one event for send `id` into the session. Returns whether
    /// anything changed.
    pub fn apply(&mut self, id: u64, event: StreamEvent) -> bool {
        if id != self.send_id || !self.is_typing {
            tracing::debug!(id, current = self.send_id, "Dropping stale stream event");
            return false;
        }
        match event {
            StreamEvent::Chunk(text) => self.apply_chunk(&text),
            StreamEvent::Done => self.finish(),
            StreamEvent::Failed(err) => self.fail(&err),
        }
        true
    }

    /// Abort the in-flight reply, if any.
    pub fn cancel(&mut self) -> bool {
        if !self.is_typing {
            return false;
        }
        self.fail(&SendError::Cancelled);
        true
    }

    fn apply_chunk(&mut self, text: &str) {
        self.reply.push_str(text);
        if let Err(err) = self.conversation.set_tail_content(&self.reply) {
            tracing::error!(%err, "Reply chunk arrived without a placeholder");
            return;
        }
        self.touch();
    }

    fn finish(&mut self) {
        self.conversation.close_reply();
        self.is_typing = false;
        self.touch();
        tracing::info!(chars = self.reply.chars().count(), "Message complete");
    }

    fn fail(&mut self, err: &SendError) {
        tracing::warn!(%err, "Reply failed");
        self.error = Some(err.to_string());
        if self.conversation.remove_tail_if_empty() {
            tracing::debug!("Removed empty assistant placeholder");
        }
        self.is_typing = false;
        self.touch();
    }

    /// Run a whole send inline, calling `on_change` after every mutation.
    ///
    /// Failures after the request was issued are already reflected in the
    /// session (error banner, rollback) when this returns them.
    pub async fn send<T, F>(
        &mut self,
        transport: &T,
        input: &str,
        mut on_change: F,
    ) -> Result<(), SendError>
    where
        T: ChatTransport + ?Sized,
        F: FnMut(&Session),
    {
        let outgoing = self.begin_send(input)?;
        on_change(self);

        let mode = self.decode_mode;
        let mut failure = None;
        stream_reply(transport, &outgoing.text, mode, |event| {
            if let StreamEvent::Failed(err) = &event {
                failure = Some(err.clone());
            }
            self.apply(outgoing.id, event);
            on_change(&*self);
        })
        .await;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Request a reply for `message` and report its progress through `emit`.
///
/// Always ends with exactly one `Done` or `Failed`.
pub async fn stream_reply<T, F>(transport: &T, message: &str, mode: DecodeMode, mut emit: F)
where
    T: ChatTransport + ?Sized,
    F: FnMut(StreamEvent),
{
    let mut body = match transport.open(message).await {
        Ok(body) => body,
        Err(err) => {
            emit(StreamEvent::Failed(err));
            return;
        }
    };

    let mut decoder = Utf8Decoder::new(mode);
    while let Some(chunk) = body.next().await {
        let decoded = chunk.and_then(|bytes| {
            tracing::debug!(bytes = bytes.len(), "Received chunk");
            decoder.decode(&bytes).map_err(SendError::from)
        });
        match decoded {
            Ok(text) => emit(StreamEvent::Chunk(text)),
            Err(err) => {
                emit(StreamEvent::Failed(err));
                return;
            }
        }
    }

    match decoder.finish() {
        Ok(tail) => {
            if !tail.is_empty() {
                emit(StreamEvent::Chunk(tail));
            }
            emit(StreamEvent::Done);
        }
        Err(err) => emit(StreamEvent::Failed(err.into())),
    }
}
