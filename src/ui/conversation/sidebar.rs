use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// One row of the conversation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub id: String,
    pub title: String,
    pub is_active: bool,
}

/// Conversation list. Titles are passed in fresh each frame.
pub struct Sidebar<'a> {
    entries: &'a [SidebarEntry],
    selected: usize,
    locked: bool,
}

impl<'a> Sidebar<'a> {
    pub fn new(entries: &'a [SidebarEntry], selected: usize) -> Self {
        Self {
            entries,
            selected,
            locked: false,
        }
    }

    /// Dim the list while switching is unavailable
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }
}

impl Widget for Sidebar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Conversations ")
            .style(if self.locked {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            });

        let inner = block.inner(area);
        block.render(area, buf);

        let height = inner.height as usize;
        if height == 0 {
            return;
        }
        // scroll so the selection stays in view
        let start = (self.selected + 1).saturating_sub(height);

        for (row, (index, entry)) in self.entries.iter().enumerate().skip(start).take(height).enumerate() {
            let marker = if entry.is_active { "● " } else { "  " };
            let mut style = if entry.is_active {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            if index == self.selected {
                style = style.bg(Color::DarkGray);
            }

            let line = Line::from(vec![Span::styled(marker, style), Span::styled(entry.title.clone(), style)]);
            buf.set_line(inner.x, inner.y + row as u16, &line, inner.width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(count: usize) -> Vec<SidebarEntry> {
        (0..count)
            .map(|i| SidebarEntry {
                id: format!("id-{i}"),
                title: format!("chat {i}"),
                is_active: i == 0,
            })
            .collect()
    }

    fn rendered(sidebar: Sidebar<'_>, width: u16, height: u16) -> String {
        let area = Rect::new(0, 0, width, height);
        let mut buf = Buffer::empty(area);
        sidebar.render(area, &mut buf);
        buf.content.iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn marks_active_conversation() {
        let entries = entries(2);
        let screen = rendered(Sidebar::new(&entries, 1), 24, 5);
        assert!(screen.contains("● chat 0"));
        assert!(screen.contains("chat 1"));
    }

    #[test]
    fn scrolls_to_keep_selection_visible() {
        let entries = entries(10);
        let screen = rendered(Sidebar::new(&entries, 9), 24, 5);
        assert!(screen.contains("chat 9"));
        assert!(!screen.contains("chat 0"));
    }
}
