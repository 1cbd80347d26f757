//! Terminal front end

pub mod conversation;

use std::io::{self, Stdout};

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use futures::StreamExt;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::controller::ChatController;
use crate::events::TaggedEvent;
use crate::session::ConversationRegistry;
use crate::storage::FileStore;
use crate::streaming::StreamClient;
use conversation::ConversationManager;

type Tui = Terminal<CrosstermBackend<Stdout>>;

const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Open the conversation store and run the chat screen until the user quits
pub async fn run(config: &Config) -> Result<()> {
    let store = FileStore::open(config.store_path()).context("Failed to open conversation store")?;
    tracing::info!(path = %store.path().display(), "opened conversation store");

    let controller = ChatController::new(ConversationRegistry::load(Box::new(store)));
    let client = StreamClient::new(config.client.backend_url.clone()).context("Failed to create HTTP client")?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut manager = ConversationManager::new(controller, client, tx);

    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, &mut manager, &mut rx).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Tui,
    manager: &mut ConversationManager,
    stream_events: &mut mpsc::UnboundedReceiver<TaggedEvent>,
) -> Result<()> {
    let mut terminal_events = EventStream::new();
    let mut frames = interval(FRAME_INTERVAL);

    while !manager.should_quit() {
        terminal.draw(|frame| manager.draw(frame))?;

        tokio::select! {
            Some(event) = stream_events.recv() => {
                manager.on_stream_event(event);
                // apply whatever else already arrived before redrawing
                while let Ok(event) = stream_events.try_recv() {
                    manager.on_stream_event(event);
                }
            }
            event = terminal_events.next() => match event {
                Some(Ok(Event::Key(key))) => manager.handle_key(key),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Failed to read terminal event"),
                None => break,
            },
            _ = frames.tick() => manager.on_tick(),
        }
    }

    Ok(())
}

fn setup_terminal() -> Result<Tui> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    // leave the terminal usable if something panics mid-frame
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        default_hook(info);
    }));

    Terminal::new(CrosstermBackend::new(stdout)).context("Failed to create terminal")
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}
