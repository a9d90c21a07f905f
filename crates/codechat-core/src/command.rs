//! Slash-command parsing and command palette filtering.

/// A command offered in the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command token including the leading slash.
    pub name: &'static str,
    /// One-line description shown next to the command.
    pub description: &'static str,
}

/// Commands forwarded to the server in the `command` field of a message.
pub const SERVER_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/explain",
        description: "Explain code",
    },
    CommandSpec {
        name: "/refactor",
        description: "Refactor code",
    },
    CommandSpec {
        name: "/tests",
        description: "Generate tests",
    },
    CommandSpec {
        name: "/summarize",
        description: "Summarize chat",
    },
];

/// User input split into an optional leading command and the remaining text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInput {
    /// The leading `/command` token, if any.
    pub command: Option<String>,
    /// Everything after the command, or the whole input.
    pub content: String,
}

impl ParsedInput {
    /// Reassemble the text as the user typed it, for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        match &self.command {
            Some(command) if self.content.is_empty() => command.clone(),
            Some(command) => format!("{command} {}", self.content),
            None => self.content.clone(),
        }
    }
}

/// Parse raw input from the message box.
///
/// Returns `None` for blank input. A leading `/` marks a command that ends at
/// the first space; the rest of the line is kept exactly as typed.
#[must_use]
pub fn parse_input(raw: &str) -> Option<ParsedInput> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed.starts_with('/') {
        return Some(ParsedInput {
            command: None,
            content: trimmed.to_string(),
        });
    }

    let (command, content) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    Some(ParsedInput {
        command: Some(command.to_string()),
        content: content.to_string(),
    })
}

/// Commands whose name starts with the lowercased `prefix`.
#[must_use]
pub fn filter_by_prefix<'a>(commands: &'a [CommandSpec], prefix: &str) -> Vec<&'a CommandSpec> {
    let prefix = prefix.to_lowercase();
    commands
        .iter()
        .filter(|command| command.name.starts_with(&prefix))
        .collect()
}
