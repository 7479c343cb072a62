use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use crate::app::App;
use crate::state::{ChatMessage, ChatRole};

pub fn render(app: &mut App, frame: &mut Frame) {
    let error_height = if app.session.error().is_some() { 3 } else { 0 };

    let [header_area, error_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(error_height),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(app, frame, header_area);
    if error_height > 0 {
        render_error(app, frame, error_area);
    }
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(
            format!(" {} Bot ", app.bot_name),
            Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{} messages", app.session.conversation().len()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(title), area);
}

fn render_error(app: &App, frame: &mut Frame, area: Rect) {
    let message = app.session.error().unwrap_or_default();
    let banner = Paragraph::new(Line::from(vec![
        Span::styled("Error: ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
        Span::styled(message.to_string(), Style::default().fg(Color::LightRed)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red)),
    );
    frame.render_widget(banner, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let messages = app.session.conversation().messages();
    if messages.is_empty() {
        let placeholder = Text::from(vec![
            Line::default(),
            Line::from(Span::styled(
                format!("Start a conversation with {}!", app.bot_name),
                Style::default().fg(Color::Gray),
            )),
            Line::from(Span::styled(
                "Ask me anything...",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
        let empty = Paragraph::new(placeholder)
            .alignment(Alignment::Center)
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let chat = transcript(messages, &app.bot_name, app.is_typing(), app.animation_frame)
        .block(block)
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

/// The transcript as the chat pane draws it, before border and scroll.
///
/// `App` measures this same paragraph to find the bottom of the view.
pub fn transcript(
    messages: &[ChatMessage],
    bot_name: &str,
    typing: bool,
    animation_frame: u8,
) -> Paragraph<'static> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let last = messages.len().saturating_sub(1);

    for (idx, msg) in messages.iter().enumerate() {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    "You:",
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.split('\n') {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    format!("{}:", bot_name),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                if msg.content.is_empty() {
                    if typing && idx == last {
                        // Animated ellipsis: cycles through ".", "..", "..."
                        let dots = ".".repeat((animation_frame as usize) + 1);
                        lines.push(Line::from(Span::styled(
                            format!("Thinking{}", dots),
                            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                        )));
                    } else {
                        lines.push(Line::default());
                    }
                } else {
                    for line in msg.content.split('\n') {
                        lines.push(Line::from(line.to_string()));
                    }
                }
            }
        }
        lines.push(Line::default());
    }

    Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false })
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let typing = app.is_typing();
    let border_color = if typing {
        Color::DarkGray
    } else {
        Color::Yellow
    };

    let send_label = if typing { " ... " } else { " Send " };
    let send_style = if app.can_send() {
        Style::default().fg(Color::Black).bg(Color::Blue).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Message ")
        .title_top(Line::from(Span::styled(send_label, send_style)).right_aligned());

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let (scroll_offset, cursor_x) = input_viewport(&app.input, app.cursor, inner_width);

    let input = if app.input.is_empty() {
        Paragraph::new(Span::styled(
            format!("Ask {} something...", app.bot_name),
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        // Get the visible slice of the input
        let visible_text: String = app
            .input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        let style = if typing {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Cyan)
        };
        Paragraph::new(visible_text).style(style)
    };

    frame.render_widget(input.block(block), area);

    // Show cursor only while the input is enabled
    if !typing {
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

/// Horizontal scroll (in chars) and cursor column for a one-line input box.
///
/// Columns are display width, so wide characters take two cells.
fn input_viewport(input: &str, cursor: usize, inner_width: usize) -> (usize, u16) {
    let before: Vec<char> = input.chars().take(cursor).collect();
    let column = |from: usize| Line::from(before[from..].iter().collect::<String>()).width();

    // Leave a free cell for the cursor itself
    let mut offset = 0;
    while offset < before.len() && column(offset) >= inner_width {
        offset += 1;
    }
    (offset, column(offset) as u16)
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let hint = if app.is_typing() {
        " Esc cancel  PgUp/PgDn scroll  Ctrl-C quit"
    } else {
        " Enter send  Esc quit  PgUp/PgDn scroll"
    };
    let footer = Paragraph::new(Span::styled(hint, Style::default().fg(Color::DarkGray)));
    frame.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpChatClient;
    use crate::config::Config;
    use crate::session::StreamEvent;
    use ratatui::{backend::TestBackend, Terminal};
    use tokio::sync::mpsc;

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(&Config::new(), HttpChatClient::new("http://127.0.0.1:9/chat"), tx)
    }

    fn draw(app: &mut App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(60, 20)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        let buffer = terminal.backend().buffer();
        let mut screen = String::new();
        for row in buffer.content().chunks(buffer.area.width as usize) {
            for cell in row {
                screen.push_str(cell.symbol());
            }
            screen.push('\n');
        }
        screen
    }

    #[test]
    fn test_empty_state() {
        let mut app = test_app();
        let screen = draw(&mut app);

        assert!(screen.contains("Gemma Bot"));
        assert!(screen.contains("Start a conversation with Gemma!"));
        assert!(screen.contains("Ask Gemma something..."));
        assert!(screen.contains("Send"));
        assert_eq!(app.chat_width, 58);
    }

    #[tokio::test]
    async fn test_thinking_then_reply() {
        let mut app = test_app();
        app.input = "Hello".to_string();
        app.submit();

        let screen = draw(&mut app);
        assert!(screen.contains("You:"));
        assert!(screen.contains("Thinking."));
        assert!(screen.contains("..."));

        app.apply_stream(1, StreamEvent::Chunk("Hi there!".to_string()));
        app.apply_stream(1, StreamEvent::Done);
        let screen = draw(&mut app);
        assert!(screen.contains("Gemma:"));
        assert!(screen.contains("Hi there!"));
        assert!(!screen.contains("Thinking"));
    }

    #[tokio::test]
    async fn test_long_reply_scrolls_to_last_word() {
        let mut app = test_app();
        app.input = "Hello".to_string();
        app.submit();
        app.sync_scroll();
        draw(&mut app);

        // Words too long to share a row: one row each at 58 columns
        let mut reply = vec!["a".repeat(29); 20].join(" ");
        reply.push_str(" ENDMARK");
        app.apply_stream(1, StreamEvent::Chunk(reply));
        app.apply_stream(1, StreamEvent::Done);
        app.sync_scroll();

        let screen = draw(&mut app);
        assert!(screen.contains("ENDMARK"));
        assert!(!screen.contains("You:"));

        app.scroll_up(u16::MAX);
        assert!(!draw(&mut app).contains("ENDMARK"));
        app.scroll_down(u16::MAX);
        assert!(draw(&mut app).contains("ENDMARK"));
    }

    #[test]
    fn test_input_viewport_ascii() {
        assert_eq!(input_viewport("hello", 5, 20), (0, 5));
        assert_eq!(input_viewport("abcdefghij", 10, 5), (6, 4));
        assert_eq!(input_viewport("abcdefghij", 2, 5), (0, 2));
    }

    #[test]
    fn test_input_viewport_wide_chars() {
        assert_eq!(input_viewport("日本語", 3, 20), (0, 6));
        assert_eq!(input_viewport("日本語", 1, 20), (0, 2));
        // 8 columns before the cursor in a 5 column box
        assert_eq!(input_viewport("日本語ab", 5, 5), (2, 4));
    }

    #[tokio::test]
    async fn test_error_banner() {
        let mut app = test_app();
        app.input = "Hello".to_string();
        app.submit();
        app.cancel_reply();

        let screen = draw(&mut app);
        assert!(screen.contains("Error: Request cancelled"));
    }
}
