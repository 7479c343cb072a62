use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::HttpChatClient;
use crate::config::Config;
use crate::session::{stream_reply, Outgoing, Session, StreamEvent};
use crate::tui::AppEvent;
use crate::ui;

/// Fallback transcript size before the first frame has been drawn
const DEFAULT_CHAT_WIDTH: u16 = 50;
const DEFAULT_CHAT_HEIGHT: u16 = 20;

pub struct App {
    pub should_quit: bool,
    pub session: Session,
    pub bot_name: String,

    // Input box
    pub input: String,
    pub cursor: usize, // in chars, not bytes

    // Transcript viewport
    pub scroll: u16,
    pub chat_height: u16, // inner height, set by the renderer
    pub chat_width: u16,  // inner width, set by the renderer

    pub animation_frame: u8, // 0-2 for ellipsis animation

    client: HttpChatClient,
    events: mpsc::UnboundedSender<AppEvent>,
    reply_task: Option<JoinHandle<()>>,
    seen_revision: u64,
}

impl App {
    pub fn new(
        config: &Config,
        client: HttpChatClient,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            session: Session::with_decode_mode(config.decode_mode()),
            bot_name: config.bot_name().to_string(),
            input: String::new(),
            cursor: 0,
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            client,
            events,
            reply_task: None,
            seen_revision: 0,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.session.is_typing()
    }

    /// Whether the send control is enabled.
    pub fn can_send(&self) -> bool {
        !self.is_typing() && !self.input.trim().is_empty()
    }

    /// Send the input box contents and start streaming the reply.
    pub fn submit(&mut self) {
        if self.is_typing() {
            return;
        }
        match self.session.begin_send(&self.input) {
            Ok(outgoing) => {
                self.input.clear();
                self.cursor = 0;
                self.spawn_reply(outgoing);
            }
            Err(err) => tracing::debug!(%err, "Send rejected"),
        }
    }

    fn spawn_reply(&mut self, outgoing: Outgoing) {
        let client = self.client.clone();
        let events = self.events.clone();
        let mode = self.session.decode_mode();

        self.reply_task = Some(tokio::spawn(async move {
            let id = outgoing.id;
            stream_reply(&client, &outgoing.text, mode, |event| {
                // The receiver only goes away when the app is shutting down
                let _ = events.send(AppEvent::Stream { id, event });
            })
            .await;
        }));
    }

    pub fn apply_stream(&mut self, id: u64, event: StreamEvent) {
        self.session.apply(id, event);
        if !self.session.is_typing() {
            self.reply_task = None;
        }
    }

    /// Abort the in-flight reply and roll it back like any other failure.
    pub fn cancel_reply(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if self.session.cancel() {
            tracing::info!("Reply cancelled by user");
        }
    }

    /// Follow the conversation: any change since the last call scrolls the
    /// transcript to its last line.
    pub fn sync_scroll(&mut self) {
        let revision = self.session.revision();
        if revision != self.seen_revision {
            self.seen_revision = revision;
            self.scroll_to_bottom();
        }
    }

    fn viewport(&self) -> (u16, u16) {
        let width = if self.chat_width > 0 {
            self.chat_width
        } else {
            DEFAULT_CHAT_WIDTH
        };
        let height = if self.chat_height > 0 {
            self.chat_height
        } else {
            DEFAULT_CHAT_HEIGHT
        };
        (width, height)
    }

    /// Rendered line count of the transcript, wrapped the way `ui` wraps it.
    pub fn transcript_height(&self) -> u16 {
        let (width, _) = self.viewport();
        let lines = ui::transcript(
            self.session.conversation().messages(),
            &self.bot_name,
            self.is_typing(),
            self.animation_frame,
        )
        .line_count(width);
        lines.min(u16::MAX as usize) as u16
    }

    fn max_scroll(&self) -> u16 {
        let (_, height) = self.viewport();
        self.transcript_height().saturating_sub(height)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
    }

    pub fn page_up(&mut self) {
        let (_, height) = self.viewport();
        self.scroll_up((height / 2).max(1));
    }

    pub fn page_down(&mut self) {
        let (_, height) = self.viewport();
        self.scroll_down((height / 2).max(1));
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_typing() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn insert_char(&mut self, c: char) {
        let byte_pos = char_to_byte_index(&self.input, self.cursor);
        self.input.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.cursor = self.input.chars().count();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> (App, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = HttpChatClient::new("http://127.0.0.1:9/chat");
        (App::new(&Config::new(), client, tx), rx)
    }

    #[test]
    fn test_transcript_height_wraps_on_words() {
        let (mut app, _rx) = test_app();
        app.chat_width = 10;
        app.session.begin_send("aaaaaa bbbbbb cccccc\nend").unwrap();

        // 20 chars would fit two 10-column rows, but no word is split:
        // user: label + 3 + 1 + blank; reply: label + thinking + blank
        assert_eq!(app.transcript_height(), 6 + 3);
    }

    #[test]
    fn test_transcript_height_splits_long_words() {
        let (mut app, _rx) = test_app();
        app.chat_width = 10;
        app.session.begin_send("Hello").unwrap();
        app.apply_stream(1, StreamEvent::Chunk("0123456789abc\nsecond".to_string()));
        app.apply_stream(1, StreamEvent::Done);

        // user: label + 1 + blank; reply: label + 2 + 1 + blank
        assert_eq!(app.transcript_height(), 3 + 5);
    }

    #[test]
    fn test_scroll_down_reaches_end_of_wrapped_reply() {
        let (mut app, _rx) = test_app();
        app.chat_width = 20;
        app.chat_height = 4;
        app.session.begin_send("Hello").unwrap();
        // Fifteen 15-column words: one row each at width 20
        let reply = vec!["wwwwwwwwwwwwwww"; 15].join(" ");
        app.apply_stream(1, StreamEvent::Chunk(reply));
        app.apply_stream(1, StreamEvent::Done);

        // user: 3; reply: label + 15 + blank
        assert_eq!(app.transcript_height(), 3 + 17);
        app.scroll_down(u16::MAX);
        assert_eq!(app.scroll, 20 - 4);
    }

    #[test]
    fn test_input_editing_is_char_based() {
        let (mut app, _rx) = test_app();
        for c in "héllo".chars() {
            app.insert_char(c);
        }
        app.cursor_home();
        app.cursor_right();
        app.delete();
        assert_eq!(app.input, "hllo");

        app.cursor_end();
        app.backspace();
        assert_eq!(app.input, "hll");
        assert_eq!(app.cursor, 3);
    }

    #[tokio::test]
    async fn test_blank_submit_is_ignored() {
        let (mut app, _rx) = test_app();
        app.input = "   ".to_string();

        assert!(!app.can_send());
        app.submit();

        assert!(app.session.conversation().is_empty());
        assert!(!app.is_typing());
        assert_eq!(app.input, "   ");
    }

    #[tokio::test]
    async fn test_submit_then_stream_events() {
        let (mut app, _rx) = test_app();
        app.input = "Hello".to_string();
        app.cursor_end();

        app.submit();
        assert!(app.is_typing());
        assert!(app.input.is_empty());
        assert!(!app.can_send());

        // The real task would fail against port 9; feed the events by hand
        app.cancel_reply();
        app.input = "Again".to_string();
        app.submit();
        let id = 2;
        app.apply_stream(id, StreamEvent::Chunk("Hi".to_string()));
        app.apply_stream(id, StreamEvent::Chunk(" there".to_string()));
        app.apply_stream(id, StreamEvent::Done);

        let messages = app.session.conversation().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "Hi there");
        assert!(!app.is_typing());
        assert_eq!(app.session.error(), None);
    }

    #[tokio::test]
    async fn test_submit_while_typing_is_ignored() {
        let (mut app, _rx) = test_app();
        app.input = "first".to_string();
        app.submit();

        app.input = "second".to_string();
        app.submit();

        assert_eq!(app.session.conversation().len(), 2);
        assert_eq!(app.input, "second");
        app.cancel_reply();
    }

    #[tokio::test]
    async fn test_reply_task_reports_failure() {
        let (mut app, mut rx) = test_app();
        app.input = "Hello".to_string();
        app.submit();

        // Nothing listens on port 9, so the task ends with a transport failure
        while let Some(event) = rx.recv().await {
            if let AppEvent::Stream { id, event } = event {
                let failed = matches!(event, StreamEvent::Failed(_));
                app.apply_stream(id, event);
                if failed {
                    break;
                }
            }
        }

        assert_eq!(app.session.conversation().len(), 1);
        assert!(app.session.error().is_some());
        assert!(!app.is_typing());
    }

    #[tokio::test]
    async fn test_sync_scroll_follows_new_content() {
        let (mut app, _rx) = test_app();
        app.chat_width = 20;
        app.chat_height = 4;

        app.input = "Hello".to_string();
        app.submit();
        app.sync_scroll();
        // Two messages of label, one line and a blank: 6 lines in a 4 line view
        assert_eq!(app.scroll, 2);

        app.scroll_up(2);
        assert_eq!(app.scroll, 0);
        app.sync_scroll();
        assert_eq!(app.scroll, 0);

        let id = 1;
        app.apply_stream(id, StreamEvent::Chunk("one\ntwo\nthree".to_string()));
        app.sync_scroll();
        assert_eq!(app.scroll, 4);

        app.scroll_down(10);
        assert_eq!(app.scroll, 4);
        app.cancel_reply();
    }
}
