//! The chat transcript shown in the terminal.

use chrono::{Local, NaiveDateTime};

use codechat_core::Role;
use codechat_session::Presentation;

/// What produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    Error,
}

impl From<Role> for EntryKind {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

/// One message or notice.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub kind: EntryKind,
    pub text: String,
    /// Streaming has finished; the text will not change again.
    pub finalized: bool,
    pub at: NaiveDateTime,
}

/// Transcript state, driven by the chat controller.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    generating: bool,
    filter: Option<String>,
}

impl Transcript {
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn is_generating(&self) -> bool {
        self.generating
    }

    /// Active search filter, lowercased.
    #[must_use]
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Filter the transcript to entries containing `query`, ignoring case.
    /// An empty query shows everything. Returns the number of visible entries.
    pub fn set_filter(&mut self, query: &str) -> usize {
        let query = query.trim();
        self.filter = (!query.is_empty()).then(|| query.to_lowercase());
        self.visible().count()
    }

    /// Entries passing the current filter, in order.
    pub fn visible(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |entry| match &self.filter {
            Some(query) => entry.text.to_lowercase().contains(query),
            None => true,
        })
    }

    /// Overwrite the timestamp of the newest entry.
    pub fn stamp_last(&mut self, at: NaiveDateTime) {
        if let Some(entry) = self.entries.last_mut() {
            entry.at = at;
        }
    }

    fn open_entry(&mut self) -> Option<&mut Entry> {
        self.entries.last_mut().filter(|entry| !entry.finalized)
    }
}

impl Presentation for Transcript {
    fn begin_message(&mut self, role: Role) {
        self.entries.push(Entry {
            kind: role.into(),
            text: String::new(),
            finalized: false,
            at: Local::now().naive_local(),
        });
    }

    fn set_message_text(&mut self, full_text: &str) {
        if let Some(entry) = self.open_entry() {
            full_text.clone_into(&mut entry.text);
        }
    }

    fn finalize_message(&mut self) {
        if let Some(entry) = self.open_entry() {
            entry.finalized = true;
        }
    }

    fn show_error(&mut self, text: &str) {
        self.entries.push(Entry {
            kind: EntryKind::Error,
            text: text.to_string(),
            finalized: true,
            at: Local::now().naive_local(),
        });
    }

    fn clear_all(&mut self) {
        self.entries.clear();
    }

    fn set_generating(&mut self, generating: bool) {
        self.generating = generating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_messages(texts: &[(Role, &str)]) -> Transcript {
        let mut transcript = Transcript::default();
        for (role, text) in texts {
            transcript.begin_message(*role);
            transcript.set_message_text(text);
            transcript.finalize_message();
        }
        transcript
    }

    #[test]
    fn streaming_updates_the_open_entry() {
        let mut transcript = Transcript::default();
        transcript.begin_message(Role::Assistant);
        transcript.set_message_text("Hel");
        transcript.set_message_text("Hello");
        assert!(!transcript.entries()[0].finalized);

        transcript.finalize_message();
        transcript.set_message_text("ignored");
        assert_eq!(transcript.entries()[0].text, "Hello");
        assert!(transcript.entries()[0].finalized);
    }

    #[test]
    fn errors_are_finalized_entries() {
        let mut transcript = Transcript::default();
        transcript.show_error("rate limited");
        let entry = &transcript.entries()[0];
        assert_eq!(entry.kind, EntryKind::Error);
        assert!(entry.finalized);
    }

    #[test]
    fn filter_is_case_insensitive() {
        let mut transcript = with_messages(&[
            (Role::User, "What is a Trait?"),
            (Role::Assistant, "A trait defines shared behavior."),
            (Role::User, "thanks"),
        ]);
        assert_eq!(transcript.set_filter("TRAIT"), 2);
        assert_eq!(transcript.filter(), Some("trait"));
        assert_eq!(transcript.set_filter("  "), 3);
        assert_eq!(transcript.filter(), None);
    }

    #[test]
    fn clear_all_empties_the_transcript() {
        let mut transcript = with_messages(&[(Role::User, "hi")]);
        transcript.clear_all();
        assert!(transcript.is_empty());
    }

    #[test]
    fn stamp_last_overrides_timestamp() {
        let mut transcript = with_messages(&[(Role::User, "hi")]);
        let at = NaiveDateTime::parse_from_str("2024-05-01 10:20:30", "%Y-%m-%d %H:%M:%S").unwrap();
        transcript.stamp_last(at);
        assert_eq!(transcript.entries()[0].at, at);
    }
}
