//! Commands handled by the terminal client itself.
//!
//! Anything that is not a local command is sent to the server, including the
//! server-side slash commands.

use codechat_core::{filter_by_prefix, CommandSpec, SERVER_COMMANDS};

/// Commands the client runs without contacting the chat connection.
pub const LOCAL_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/clear",
        description: "Clear chat history",
    },
    CommandSpec {
        name: "/search",
        description: "Filter the transcript",
    },
    CommandSpec {
        name: "/set",
        description: "Change model, provider, temperature or max_tokens",
    },
    CommandSpec {
        name: "/reconnect",
        description: "Reconnect to the server",
    },
    CommandSpec {
        name: "/logout",
        description: "End the server session",
    },
    CommandSpec {
        name: "/help",
        description: "Show keys and commands",
    },
    CommandSpec {
        name: "/quit",
        description: "Exit",
    },
];

/// A parsed local command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Clear,
    Search(String),
    Set { key: String, value: String },
    Reconnect,
    Logout,
    Help,
    Quit,
}

impl LocalCommand {
    /// Parse `input` as a local command.
    ///
    /// Returns `None` when the input is not a local command, and `Some(Err)`
    /// with a usage hint when it is one but the arguments are wrong.
    pub fn parse(input: &str) -> Option<Result<Self, String>> {
        let input = input.trim();
        let (name, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();

        let command = match name {
            "/clear" => Ok(Self::Clear),
            "/search" => Ok(Self::Search(rest.to_string())),
            "/set" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
                [key, value] => Ok(Self::Set {
                    key: (*key).to_string(),
                    value: (*value).to_string(),
                }),
                _ => Err(
                    "usage: /set model|provider|temperature|max_tokens <value>".to_string(),
                ),
            },
            "/reconnect" => Ok(Self::Reconnect),
            "/logout" => Ok(Self::Logout),
            "/help" => Ok(Self::Help),
            "/quit" | "/exit" => Ok(Self::Quit),
            _ => return None,
        };
        Some(command)
    }
}

/// Palette entries matching the command being typed.
///
/// The palette only shows while the input is a single `/word`.
#[must_use]
pub fn suggestions(input: &str) -> Vec<&'static CommandSpec> {
    if !input.starts_with('/') || input.contains(char::is_whitespace) {
        return Vec::new();
    }
    let mut matches = filter_by_prefix(SERVER_COMMANDS, input);
    matches.extend(filter_by_prefix(LOCAL_COMMANDS, input));
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_and_server_commands_are_not_local() {
        assert_eq!(LocalCommand::parse("hello"), None);
        assert_eq!(LocalCommand::parse("/explain this"), None);
    }

    #[test]
    fn parses_local_commands() {
        assert_eq!(LocalCommand::parse("/clear"), Some(Ok(LocalCommand::Clear)));
        assert_eq!(
            LocalCommand::parse("/search  Borrow Checker "),
            Some(Ok(LocalCommand::Search("Borrow Checker".to_string())))
        );
        assert_eq!(
            LocalCommand::parse("/search"),
            Some(Ok(LocalCommand::Search(String::new())))
        );
        assert_eq!(
            LocalCommand::parse("/set temperature 0.3"),
            Some(Ok(LocalCommand::Set {
                key: "temperature".to_string(),
                value: "0.3".to_string(),
            }))
        );
        assert_eq!(LocalCommand::parse("/logout"), Some(Ok(LocalCommand::Logout)));
        assert_eq!(LocalCommand::parse("/quit"), Some(Ok(LocalCommand::Quit)));
    }

    #[test]
    fn set_requires_key_and_value() {
        assert!(matches!(LocalCommand::parse("/set temperature"), Some(Err(_))));
        assert!(matches!(LocalCommand::parse("/set a b c"), Some(Err(_))));
    }

    #[test]
    fn suggestions_cover_both_command_sets() {
        let names: Vec<_> = suggestions("/").iter().map(|c| c.name).collect();
        assert!(names.contains(&"/explain"));
        assert!(names.contains(&"/clear"));

        let names: Vec<_> = suggestions("/S").iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["/summarize", "/search", "/set"]);
    }

    #[test]
    fn suggestions_hide_once_arguments_start() {
        assert!(suggestions("/explain ").is_empty());
        assert!(suggestions("hello").is_empty());
        assert!(suggestions("/zzz").is_empty());
    }
}
