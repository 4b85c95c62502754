//! Interactive console commands.

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Stop the client and exit.
    Quit,
    /// Drop the connection and connect again.
    Reconnect,
    /// Turn auto reconnect on or off.
    Auto(bool),
    /// Send the text to the peer.
    Send(String),
    /// Nothing to do.
    Empty,
    /// Unrecognized slash command.
    Unknown(String),
}

impl ConsoleCommand {
    /// Parse one input line.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if !trimmed.starts_with('/') {
            return Self::Send(trimmed.to_string());
        }

        let mut parts = trimmed.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::to_ascii_lowercase);

        match (command.as_str(), arg.as_deref()) {
            ("/quit" | "/exit", _) => Self::Quit,
            ("/reconnect", _) => Self::Reconnect,
            ("/auto", None | Some("on" | "true" | "1")) => Self::Auto(true),
            ("/auto", Some("off" | "false" | "0")) => Self::Auto(false),
            _ => Self::Unknown(trimmed.to_string()),
        }
    }

    /// One-line usage text.
    #[must_use]
    pub const fn help() -> &'static str {
        "commands: /quit, /reconnect, /auto <on|off>; anything else is sent to the peer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/quit", ConsoleCommand::Quit ; "quit")]
    #[test_case("  /QUIT  ", ConsoleCommand::Quit ; "quit uppercase padded")]
    #[test_case("/reconnect", ConsoleCommand::Reconnect ; "reconnect")]
    #[test_case("/auto on", ConsoleCommand::Auto(true) ; "auto on")]
    #[test_case("/auto", ConsoleCommand::Auto(true) ; "bare auto")]
    #[test_case("/Auto OFF", ConsoleCommand::Auto(false) ; "auto off mixed case")]
    #[test_case("", ConsoleCommand::Empty ; "empty")]
    #[test_case("   ", ConsoleCommand::Empty ; "whitespace")]
    #[test_case("hello peer", ConsoleCommand::Send("hello peer".to_string()) ; "text")]
    #[test_case("/auto maybe", ConsoleCommand::Unknown("/auto maybe".to_string()) ; "bad auto arg")]
    #[test_case("/dance", ConsoleCommand::Unknown("/dance".to_string()) ; "unknown")]
    fn test_parse(line: &str, expected: ConsoleCommand) {
        assert_eq!(ConsoleCommand::parse(line), expected);
    }
}
