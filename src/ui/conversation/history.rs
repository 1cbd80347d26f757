//! Message pane for the active conversation

use crate::events::{Message, Sender};
use crate::ui::conversation::streaming::StreamingIndicator;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Renders a conversation bottom-anchored, so the newest text is always visible
pub struct ConversationHistory<'a> {
    title: String,
    messages: &'a [Message],
    is_typing: bool,
    is_waiting: bool,
    tick: u64,
}

impl<'a> ConversationHistory<'a> {
    pub fn new(title: String, messages: &'a [Message]) -> Self {
        Self {
            title,
            messages,
            is_typing: false,
            is_waiting: false,
            tick: 0,
        }
    }

    pub fn typing(mut self, is_typing: bool, is_waiting: bool) -> Self {
        self.is_typing = is_typing;
        self.is_waiting = is_waiting;
        self
    }

    /// Animation frame for the waiting indicator and cursor
    pub fn tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    fn lines(&self, width: u16) -> Vec<Line<'static>> {
        let mut all_lines = Vec::new();
        let last = self.messages.len().saturating_sub(1);

        for (i, message) in self.messages.iter().enumerate() {
            let streaming = self.is_typing && !self.is_waiting && i == last && message.sender == Sender::Assistant;
            all_lines.extend(render_message(message, width, streaming, self.tick));
            all_lines.push(Line::from(""));
        }

        if self.is_waiting {
            all_lines.push(StreamingIndicator::new(self.tick).line());
        }

        all_lines
    }
}

impl Widget for ConversationHistory<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", self.title));

        let inner_area = block.inner(area);
        block.render(area, buf);

        if self.messages.is_empty() && !self.is_waiting {
            let welcome_lines = [
                Line::from(Span::styled("Nothing here yet.", Style::default().fg(Color::Green))),
                Line::from(""),
                Line::from(Span::styled(
                    "Type below and press Enter. Shift+Enter for a new line, /help for commands.",
                    Style::default().fg(Color::DarkGray),
                )),
            ];
            for (i, line) in welcome_lines.iter().enumerate() {
                if i < inner_area.height as usize {
                    buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
                }
            }
            return;
        }

        let all_lines = self.lines(inner_area.width);
        let height = inner_area.height as usize;
        let start = all_lines.len().saturating_sub(height);

        for (i, line) in all_lines[start..].iter().enumerate() {
            buf.set_line(inner_area.x, inner_area.y + i as u16, line, inner_area.width);
        }
    }
}

/// Header line plus the wrapped message text
fn render_message(message: &Message, width: u16, streaming: bool, tick: u64) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let style = content_style(message.sender);

    lines.push(Line::from(Span::styled(
        message.sender.display_name(),
        style.add_modifier(Modifier::BOLD),
    )));

    let content_lines = wrap_text(&message.text, width.saturating_sub(2) as usize);
    let count = content_lines.len();
    for (i, content_line) in content_lines.into_iter().enumerate() {
        let mut spans = vec![Span::raw("  "), Span::styled(content_line, style)];
        if streaming && i + 1 == count {
            spans.push(StreamingIndicator::new(tick).cursor());
        }
        lines.push(Line::from(spans));
    }

    lines
}

fn content_style(sender: Sender) -> Style {
    match sender {
        Sender::User => Style::default().fg(Color::Blue),
        Sender::Assistant => Style::default().fg(Color::Green),
    }
}

/// Wrap text to `width` characters, keeping explicit line breaks
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current_line = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if current_len > 0 && current_len + 1 + word_len > width {
                lines.push(std::mem::take(&mut current_line));
                current_len = 0;
            }

            if current_len > 0 {
                current_line.push(' ');
                current_len += 1;
            }

            // hard-break words longer than a whole line
            for ch in word.chars() {
                if current_len == width {
                    lines.push(std::mem::take(&mut current_line));
                    current_len = 0;
                }
                current_line.push(ch);
                current_len += 1;
            }
        }

        lines.push(current_line);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(widget: ConversationHistory<'_>, width: u16, height: u16) -> String {
        let area = Rect::new(0, 0, width, height);
        let mut buf = Buffer::empty(area);
        widget.render(area, &mut buf);
        buf.content.iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn wraps_on_word_boundaries_and_keeps_breaks() {
        assert_eq!(wrap_text("the quick brown fox", 9), vec!["the quick", "brown fox"]);
        assert_eq!(wrap_text("one\n\ntwo", 10), vec!["one", "", "two"]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("", 5), vec![""]);
    }

    #[test]
    fn shows_latest_messages_when_overflowing() {
        let messages: Vec<Message> = (0..10).map(|i| Message::user(format!("msg{i}"))).collect();
        let screen = rendered(ConversationHistory::new("Chat".into(), &messages), 30, 8);
        assert!(screen.contains("msg9"));
        assert!(!screen.contains("msg0"));
    }

    #[test]
    fn waiting_shows_indicator() {
        let messages = vec![Message::user("Hi")];
        let widget = ConversationHistory::new("Chat".into(), &messages).typing(true, true);
        let screen = rendered(widget, 40, 8);
        assert!(screen.contains("thinking"));
    }

    #[test]
    fn empty_conversation_shows_welcome() {
        let screen = rendered(ConversationHistory::new("New Chat".into(), &[]), 60, 6);
        assert!(screen.contains("Nothing here yet."));
        assert!(screen.contains("New Chat"));
    }
}
