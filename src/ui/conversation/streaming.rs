use ratatui::{
    style::{Color, Style},
    text::{Line, Span},
};

/// Animated "waiting for the first fragment" line and streaming cursor.
/// `tick` advances once per UI frame.
#[derive(Debug, Clone, Copy)]
pub struct StreamingIndicator {
    tick: u64,
}

impl StreamingIndicator {
    pub fn new(tick: u64) -> Self {
        Self { tick }
    }

    fn dots(&self) -> &'static str {
        match (self.tick / 3) % 4 {
            0 => ".",
            1 => "..",
            2 => "...",
            _ => "   ",
        }
    }

    pub fn line(&self) -> Line<'static> {
        Line::from(vec![
            Span::styled("Assistant is thinking", Style::default().fg(Color::Green)),
            Span::styled(self.dots(), Style::default().fg(Color::Yellow)),
        ])
    }

    /// Blinking block shown after the text of a reply that is still streaming
    pub fn cursor(&self) -> Span<'static> {
        let symbol = if (self.tick / 5) % 2 == 0 { "▋" } else { " " };
        Span::styled(symbol, Style::default().fg(Color::Yellow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dots_cycle_with_ticks() {
        let frames: Vec<&str> = (0..4).map(|i| StreamingIndicator::new(i * 3).dots()).collect();
        assert_eq!(frames, vec![".", "..", "...", "   "]);
    }
}
