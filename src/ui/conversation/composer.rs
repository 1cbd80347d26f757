use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// State for the text area within the composer
#[derive(Debug, Clone, Default)]
pub struct TextAreaState {
    pub content: String,
    /// Cursor position in characters, not bytes
    pub cursor_position: usize,
}

impl TextAreaState {
    fn byte_index(&self, char_index: usize) -> usize {
        self.content
            .char_indices()
            .nth(char_index)
            .map(|(i, _)| i)
            .unwrap_or(self.content.len())
    }

    fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Input row: a single text area plus send/clear availability in its title
#[derive(Debug, Clone)]
pub struct ConversationComposer {
    state: TextAreaState,
    placeholder: String,
    has_focus: bool,
}

impl ConversationComposer {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            state: TextAreaState::default(),
            placeholder: placeholder.into(),
            has_focus: true,
        }
    }

    /// Handle an editing key. Returns true when the content or cursor changed.
    /// Enter without Shift is left to the caller.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }

        match key.code {
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => {
                self.insert_char('\n');
                true
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.insert_char(c);
                true
            }
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete(),
            KeyCode::Left if self.state.cursor_position > 0 => {
                self.state.cursor_position -= 1;
                true
            }
            KeyCode::Right if self.state.cursor_position < self.state.char_len() => {
                self.state.cursor_position += 1;
                true
            }
            KeyCode::Home => {
                self.state.cursor_position = 0;
                true
            }
            KeyCode::End => {
                self.state.cursor_position = self.state.char_len();
                true
            }
            _ => false,
        }
    }

    /// Insert a character at the cursor position
    fn insert_char(&mut self, c: char) {
        let at = self.state.byte_index(self.state.cursor_position);
        self.state.content.insert(at, c);
        self.state.cursor_position += 1;
    }

    /// Delete character before cursor
    fn backspace(&mut self) -> bool {
        if self.state.cursor_position == 0 {
            return false;
        }
        self.state.cursor_position -= 1;
        let at = self.state.byte_index(self.state.cursor_position);
        self.state.content.remove(at);
        true
    }

    /// Delete character at cursor
    fn delete(&mut self) -> bool {
        if self.state.cursor_position >= self.state.char_len() {
            return false;
        }
        let at = self.state.byte_index(self.state.cursor_position);
        self.state.content.remove(at);
        true
    }

    /// Unfocused, the input is dimmed and hides its cursor
    pub fn set_focus(&mut self, has_focus: bool) {
        self.has_focus = has_focus;
    }

    pub fn has_focus(&self) -> bool {
        self.has_focus
    }

    pub fn content(&self) -> &str {
        &self.state.content
    }

    /// Take the content out, leaving the composer empty
    pub fn take(&mut self) -> String {
        self.state.cursor_position = 0;
        std::mem::take(&mut self.state.content)
    }

    pub fn clear(&mut self) {
        self.take();
    }

    /// Widget for this frame. `can_send`/`can_clear` drive the title hints.
    pub fn view(&self, can_send: bool, can_clear: bool) -> ComposerView<'_> {
        ComposerView {
            composer: self,
            can_send,
            can_clear,
        }
    }
}

pub struct ComposerView<'a> {
    composer: &'a ConversationComposer,
    can_send: bool,
    can_clear: bool,
}

impl ComposerView<'_> {
    fn title(&self) -> Line<'static> {
        let hint = |label: &'static str, enabled: bool| {
            let style = if enabled {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Span::styled(label, style)
        };

        Line::from(vec![
            Span::raw(" "),
            hint("[Enter] Send", self.can_send),
            Span::raw("  "),
            hint("[Ctrl+L] Clear", self.can_clear),
            Span::raw(" "),
        ])
    }
}

impl Widget for ComposerView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let composer = self.composer;
        let state = &composer.state;

        let block = Block::default()
            .borders(Borders::ALL)
            .title(self.title())
            .style(if composer.has_focus {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::Gray)
            });

        let inner_area = block.inner(area);
        block.render(area, buf);

        if state.content.is_empty() {
            let placeholder_line = Line::from(vec![Span::styled(
                composer.placeholder.as_str(),
                Style::default().fg(Color::DarkGray),
            )]);
            buf.set_line(inner_area.x, inner_area.y, &placeholder_line, inner_area.width);
            return;
        }

        let mut content = state.content.clone();
        if composer.has_focus {
            content.insert(state.byte_index(state.cursor_position), '▌');
        }

        // keep the cursor line visible when the input is taller than the box
        let lines: Vec<&str> = content.split('\n').collect();
        let height = inner_area.height as usize;
        let start = lines.len().saturating_sub(height);
        for (i, line_text) in lines[start..].iter().enumerate() {
            let line = Line::from(vec![Span::raw(*line_text)]);
            buf.set_line(inner_area.x, inner_area.y + i as u16, &line, inner_area.width);
        }
    }
}
