use crate::controller::ChatController;
use crate::error::ChatError;
use crate::events::{StreamEvent, TaggedEvent};
use crate::streaming::StreamClient;
use crate::ui::conversation::commands::{get_help_text, parse_slash_command, SlashCommand};
use crate::ui::conversation::{ConversationComposer, ConversationHistory, Sidebar, SidebarEntry};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tokio::sync::mpsc;

const SIDEBAR_WIDTH: u16 = 28;

/// Wires key presses to the chat controller and the streaming client, and
/// draws the sidebar, message pane, input row and status line.
pub struct ConversationManager {
    controller: ChatController,
    client: StreamClient,
    events: mpsc::UnboundedSender<TaggedEvent>,
    composer: ConversationComposer,
    selected: usize,
    notice: Option<String>,
    tick: u64,
    should_quit: bool,
}

impl ConversationManager {
    pub fn new(
        controller: ChatController,
        client: StreamClient,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let mut manager = Self {
            controller,
            client,
            events,
            composer: ConversationComposer::new("Type a message..."),
            selected: 0,
            notice: None,
            tick: 0,
            should_quit: false,
        };
        manager.select_active();
        manager
    }

    pub fn controller(&self) -> &ChatController {
        &self.controller
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn composer_focused(&self) -> bool {
        self.composer.has_focus()
    }

    /// Advance animations by one frame
    pub fn on_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Apply an event from a reply stream
    pub fn on_stream_event(&mut self, event: TaggedEvent) {
        if let StreamEvent::Failed(reason) = &event.event {
            if Some(event.token) == self.controller.current_token() {
                self.notice = Some(format!("Reply interrupted: {}", reason));
            }
        }
        self.controller.apply(event);
    }

    /// Handle a key press
    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('n') if ctrl => self.new_conversation(),
            KeyCode::Char('l') if ctrl => self.clear(),
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Tab => self.open_selected(),
            KeyCode::Enter if !key.modifiers.contains(KeyModifiers::SHIFT) => {
                self.composer.set_focus(true);
                self.submit();
            }
            _ => {
                self.composer.set_focus(true);
                self.composer.handle_key(key);
            }
        }
    }

    fn submit(&mut self) {
        if let Some(command) = parse_slash_command(self.composer.content()) {
            if self.controller.is_typing() && !command.available_during_streaming() {
                self.notice = Some(format!("/{} is unavailable while a reply is streaming", command.command()));
                return;
            }
            self.composer.clear();
            self.run_command(command);
            return;
        }

        if !self.controller.can_send(self.composer.content()) {
            if self.controller.is_typing() {
                self.notice = Some("Wait for the current reply to finish".to_string());
            }
            return;
        }

        let text = self.composer.take();
        match self.controller.send(&text) {
            Ok(exchange) => {
                self.notice = None;
                let handle = self.client.open(&exchange, self.events.clone());
                self.controller.attach(handle);
                self.select_active();
            }
            Err(e) => self.report(e),
        }
    }

    fn run_command(&mut self, command: SlashCommand) {
        match command {
            SlashCommand::New => self.new_conversation(),
            SlashCommand::Clear => self.clear(),
            SlashCommand::Help => self.notice = Some(get_help_text()),
            SlashCommand::Quit => self.should_quit = true,
        }
    }

    fn new_conversation(&mut self) {
        self.controller.new_conversation();
        self.notice = None;
        self.select_active();
    }

    fn clear(&mut self) {
        match self.controller.clear_active() {
            Ok(()) => self.notice = Some("Conversation cleared".to_string()),
            Err(e) => self.report(e),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.controller.registry().len();
        if len == 0 {
            return;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
        // dimmed until the user types or opens a conversation
        self.composer.set_focus(false);
    }

    fn open_selected(&mut self) {
        self.composer.set_focus(true);
        let Some(id) = self.controller.registry().ids().nth(self.selected).map(str::to_string) else {
            return;
        };
        match self.controller.switch_to(&id) {
            Ok(_) => self.notice = None,
            Err(e) => {
                self.report(e);
                self.select_active();
            }
        }
    }

    fn select_active(&mut self) {
        let active = self.controller.active_id();
        if let Some(index) = self.controller.registry().ids().position(|id| Some(id) == active) {
            self.selected = index;
        }
    }

    fn report(&mut self, error: ChatError) {
        self.notice = Some(match error {
            ChatError::Busy => "A reply is still streaming".to_string(),
            other => other.to_string(),
        });
    }

    fn sidebar_entries(&self) -> Vec<SidebarEntry> {
        let registry = self.controller.registry();
        let active = registry.active_id();
        registry
            .ids()
            .map(|id| SidebarEntry {
                id: id.to_string(),
                title: registry.title_for(id),
                is_active: Some(id) == active,
            })
            .collect()
    }

    /// Draw the whole screen
    pub fn draw(&self, frame: &mut Frame) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
            .split(frame.size());

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // History
                Constraint::Length(3), // Composer
                Constraint::Length(1), // Status
            ])
            .split(columns[1]);

        let entries = self.sidebar_entries();
        frame.render_widget(
            Sidebar::new(&entries, self.selected).locked(!self.controller.can_switch()),
            columns[0],
        );

        let title = self
            .controller
            .active_id()
            .map(|id| self.controller.registry().title_for(id))
            .unwrap_or_default();
        frame.render_widget(
            ConversationHistory::new(title, self.controller.messages())
                .typing(self.controller.is_typing(), self.controller.is_waiting())
                .tick(self.tick),
            rows[0],
        );

        frame.render_widget(
            self.composer.view(
                self.controller.can_send(self.composer.content()),
                self.controller.can_clear(),
            ),
            rows[1],
        );

        let status = match &self.notice {
            Some(notice) => Line::from(Span::styled(notice.clone(), Style::default().fg(Color::Yellow))),
            None => Line::from(Span::styled(
                format!("{} · /help for commands", self.client.backend_url()),
                Style::default().fg(Color::DarkGray),
            )),
        };
        frame.render_widget(Paragraph::new(status), rows[2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamToken;
    use crate::session::ConversationRegistry;
    use crate::storage::MemoryStore;

    fn manager() -> (ConversationManager, mpsc::UnboundedReceiver<TaggedEvent>) {
        let registry = ConversationRegistry::load(Box::new(MemoryStore::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let client = StreamClient::new("http://127.0.0.1:9").unwrap();
        (ConversationManager::new(ChatController::new(registry), client, tx), rx)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_line(manager: &mut ConversationManager, text: &str) {
        for c in text.chars() {
            manager.handle_key(key(KeyCode::Char(c)));
        }
        manager.handle_key(key(KeyCode::Enter));
    }

    #[test]
    fn slash_new_creates_and_selects_conversation() {
        let (mut manager, _rx) = manager();
        let first = manager.controller().active_id().unwrap().to_string();

        type_line(&mut manager, "/new");

        let active = manager.controller().active_id().unwrap().to_string();
        assert_ne!(first, active);
        assert_eq!(manager.controller().registry().len(), 2);
        let selected_id = manager.controller().registry().ids().nth(manager.selected()).unwrap();
        assert_eq!(selected_id, active);
    }

    #[test]
    fn help_and_quit_commands() {
        let (mut manager, _rx) = manager();
        type_line(&mut manager, "/help");
        assert!(manager.notice().unwrap().contains("/clear"));
        assert!(!manager.should_quit());

        manager.handle_key(ctrl('c'));
        assert!(manager.should_quit());
    }

    #[test]
    fn enter_on_blank_input_does_nothing() {
        let (mut manager, _rx) = manager();
        type_line(&mut manager, "   ");
        assert!(manager.controller().messages().is_empty());
        assert!(!manager.controller().is_typing());
    }

    #[test]
    fn tab_switches_to_selected_conversation() {
        let (mut manager, _rx) = manager();
        manager.handle_key(ctrl('n'));
        let ids: Vec<String> = manager.controller().registry().ids().map(str::to_string).collect();
        let other = ids
            .iter()
            .find(|id| Some(id.as_str()) != manager.controller().active_id())
            .unwrap()
            .clone();
        let other_index = ids.iter().position(|id| *id == other).unwrap();

        let delta = if other_index > manager.selected() { KeyCode::Down } else { KeyCode::Up };
        manager.handle_key(key(delta));
        manager.handle_key(key(KeyCode::Tab));

        assert_eq!(manager.controller().active_id(), Some(other.as_str()));
    }

    #[test]
    fn moving_the_selection_unfocuses_the_input_until_typing() {
        let (mut manager, _rx) = manager();
        assert!(manager.composer_focused());

        manager.handle_key(key(KeyCode::Down));
        assert!(!manager.composer_focused());

        manager.handle_key(key(KeyCode::Char('h')));
        assert!(manager.composer_focused());

        manager.handle_key(key(KeyCode::Up));
        manager.handle_key(key(KeyCode::Tab));
        assert!(manager.composer_focused());
    }

    #[tokio::test]
    async fn sending_locks_switching_and_clear_until_done() {
        let (mut manager, _rx) = manager();
        manager.handle_key(ctrl('n'));
        let active = manager.controller().active_id().unwrap().to_string();

        type_line(&mut manager, "Hi");
        assert!(manager.controller().is_typing());
        let token = manager.controller().current_token().unwrap();

        manager.handle_key(key(KeyCode::Up));
        manager.handle_key(key(KeyCode::Down));
        manager.handle_key(key(KeyCode::Tab));
        manager.handle_key(ctrl('l'));
        assert_eq!(manager.controller().active_id(), Some(active.as_str()));
        assert_eq!(manager.controller().messages().len(), 1);
        assert_eq!(manager.notice(), Some("A reply is still streaming"));

        manager.on_stream_event(TaggedEvent::new(token, StreamEvent::Fragment("Hello".into())));
        manager.on_stream_event(TaggedEvent::new(token, StreamEvent::Done));
        assert!(!manager.controller().is_typing());
        assert_eq!(manager.controller().messages().len(), 2);
    }

    #[tokio::test]
    async fn interrupted_reply_sets_notice_only_for_current_stream() {
        let (mut manager, _rx) = manager();
        manager.on_stream_event(TaggedEvent::new(StreamToken(99), StreamEvent::Failed("boom".into())));
        assert_eq!(manager.notice(), None);

        type_line(&mut manager, "Hi");
        let token = manager.controller().current_token().unwrap();
        manager.on_stream_event(TaggedEvent::new(token, StreamEvent::Failed("boom".into())));
        assert_eq!(manager.notice(), Some("Reply interrupted: boom"));
        assert!(!manager.controller().is_typing());
    }
}
