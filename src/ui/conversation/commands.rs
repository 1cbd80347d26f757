use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new conversation
    New,
    /// Empty the current conversation
    Clear,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new conversation",
            SlashCommand::Clear => "empty the current conversation",
            SlashCommand::Help => "show available commands",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Whether this command can be run while a reply is streaming.
    pub fn available_during_streaming(self) -> bool {
        match self {
            SlashCommand::Clear => false,
            SlashCommand::New | SlashCommand::Help | SlashCommand::Quit => true,
        }
    }
}

/// Parse a slash command from user input. Unknown commands are not commands,
/// so `/shrug` is sent as a normal message.
pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let head = rest.split_whitespace().next()?;

    SlashCommand::from_str(head).ok().or_else(|| match head.to_lowercase().as_str() {
        "q" | "exit" | "bye" => Some(SlashCommand::Quit),
        "n" => Some(SlashCommand::New),
        "c" | "reset" => Some(SlashCommand::Clear),
        "h" | "?" => Some(SlashCommand::Help),
        _ => None,
    })
}

/// One-line help for the status bar
pub fn get_help_text() -> String {
    let commands: Vec<String> = SlashCommand::iter()
        .map(|c| format!("/{} {}", c.command(), c.description()))
        .collect();
    format!(
        "{} · Ctrl+N new · Ctrl+L clear · ↑/↓ select · Tab open · Esc quit",
        commands.join(" · ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(parse_slash_command("/new"), Some(SlashCommand::New));
        assert_eq!(parse_slash_command("  /clear now "), Some(SlashCommand::Clear));
        assert_eq!(parse_slash_command("/q"), Some(SlashCommand::Quit));
        assert_eq!(parse_slash_command("/?"), Some(SlashCommand::Help));
    }

    #[test]
    fn plain_text_and_unknown_commands_are_messages() {
        assert_eq!(parse_slash_command("hello /new"), None);
        assert_eq!(parse_slash_command("/shrug"), None);
        assert_eq!(parse_slash_command("/"), None);
    }

    #[test]
    fn help_lists_every_command() {
        let help = get_help_text();
        for command in SlashCommand::iter() {
            assert!(help.contains(&format!("/{}", command.command())));
        }
    }
}
