use thiserror::Error;

use crate::storage::MessageInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Authorization,
    Transaction,
    Update,
    Closed,
}

/// Errors reported to the client as `-ERR <message>`. None of them ends the
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Pop3Error {
    #[error("Not Authorized.")]
    NotAuthorized,

    #[error("Unknown command.")]
    UnknownCommand,

    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("no such message")]
    NoSuchMessage,

    #[error("Failed Login.")]
    FailedLogin,

    #[error("not implemented")]
    NotImplemented,

    #[error("{0}")]
    Backend(String),
}

/// One message of the mailbox snapshot taken at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub index: usize,
    pub identifier: String,
    pub uid: String,
    pub size: u64,
    pub deleted: bool,
}

/// Per-connection POP3 state, owned by a single handler.
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    user: Option<String>,
    domain: Option<String>,
    authenticated: bool,
    messages: Vec<MessageEntry>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Authorization,
            user: None,
            domain: None,
            authenticated: false,
            messages: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// `(user, domain)` as given by the last accepted USER command.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.domain) {
            (Some(user), Some(domain)) => Some((user, domain)),
            _ => None,
        }
    }

    /// Validates a `user@domain` mailbox name and stores it. The stored
    /// identity is left untouched when the name is rejected.
    pub fn set_identity(&mut self, mailbox: &str) -> Result<(), Pop3Error> {
        let parts: Vec<&str> = mailbox.split('@').collect();
        match parts.as_slice() {
            [user, domain] if !user.is_empty() && !domain.is_empty() => {
                self.user = Some(user.to_string());
                self.domain = Some(domain.to_string());
                Ok(())
            }
            _ => Err(Pop3Error::InvalidArgument("Invalid username. Use user@domain.com")),
        }
    }

    /// Takes the mailbox snapshot and enters TRANSACTION. Messages are
    /// numbered 1..N in the order given; the numbering never changes.
    pub fn open_mailbox<I>(&mut self, messages: I)
        where I: IntoIterator<Item = (MessageInfo, String)>
    {
        if self.authenticated {
            return;
        }

        self.messages = messages
            .into_iter()
            .filter(|(info, _)| info.size > 0)
            .enumerate()
            .map(|(i, (info, uid))| MessageEntry {
                index: i + 1,
                identifier: info.identifier,
                uid,
                size: info.size,
                deleted: false,
            })
            .collect();
        self.authenticated = true;
        self.phase = Phase::Transaction;
    }

    /// Every entry of the snapshot, including those marked deleted.
    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    /// Entries not marked deleted, in index order.
    pub fn visible(&self) -> impl Iterator<Item = &MessageEntry> {
        self.messages.iter().filter(|m| !m.deleted)
    }

    /// Entries marked deleted, in index order.
    pub fn marked(&self) -> impl Iterator<Item = &MessageEntry> {
        self.messages.iter().filter(|m| m.deleted)
    }

    /// Message count and total size, ignoring deleted entries.
    pub fn stat(&self) -> (usize, u64) {
        self.visible().fold((0, 0), |(count, size), m| (count + 1, size + m.size))
    }

    /// Looks up a visible message.
    pub fn get(&self, index: usize) -> Result<&MessageEntry, Pop3Error> {
        self.slot(index)
            .filter(|m| !m.deleted)
            .ok_or(Pop3Error::NoSuchMessage)
    }

    /// Marks a message for deletion at QUIT. Marking twice is accepted.
    pub fn mark_deleted(&mut self, index: usize) -> Result<(), Pop3Error> {
        let slot = index
            .checked_sub(1)
            .and_then(|i| self.messages.get_mut(i))
            .ok_or(Pop3Error::NoSuchMessage)?;
        slot.deleted = true;
        Ok(())
    }

    /// Clears every delete mark.
    pub fn reset(&mut self) {
        for message in &mut self.messages {
            message.deleted = false;
        }
    }

    /// Moves to UPDATE and hands out the identifiers to purge, in index
    /// order. Only a session that logged in has anything to purge.
    pub fn begin_update(&mut self) -> Vec<String> {
        if !self.authenticated {
            return Vec::new();
        }
        self.phase = Phase::Update;
        self.marked().map(|m| m.identifier.clone()).collect()
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    fn slot(&self, index: usize) -> Option<&MessageEntry> {
        index.checked_sub(1).and_then(|i| self.messages.get(i))
    }
}

/// Parses a message number argument.
pub fn parse_index(arg: Option<&str>) -> Result<usize, Pop3Error> {
    let arg = arg.ok_or(Pop3Error::InvalidArgument("Message number required."))?;
    arg.trim().parse::<usize>().map_err(|_| Pop3Error::InvalidArgument("Invalid message number."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sizes: &[u64]) -> Vec<(MessageInfo, String)> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let info = MessageInfo { identifier: format!("inbox/{}.eml", i + 1), size: *size };
                (info, format!("{}", i + 1))
            })
            .collect()
    }

    fn open_session(sizes: &[u64]) -> Session {
        let mut session = Session::new();
        session.set_identity("a@b").unwrap();
        session.open_mailbox(snapshot(sizes));
        session
    }

    #[test]
    fn test_set_identity_requires_exactly_one_at() {
        let mut session = Session::new();
        session.set_identity("bob@example.com").unwrap();

        for bad in ["bob", "bob@example@com", "@example.com", "bob@", ""] {
            assert!(matches!(session.set_identity(bad), Err(Pop3Error::InvalidArgument(_))));
            assert_eq!(session.identity(), Some(("bob", "example.com")));
        }
    }

    #[test]
    fn test_open_mailbox_numbers_messages() {
        let session = open_session(&[100, 0, 200]);
        assert_eq!(session.phase(), Phase::Transaction);
        assert!(session.is_authenticated());

        let indices: Vec<usize> = session.messages().iter().map(|m| m.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(session.stat(), (2, 300));
    }

    #[test]
    fn test_open_mailbox_only_once() {
        let mut session = open_session(&[100]);
        session.open_mailbox(snapshot(&[1, 2, 3]));
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_delete_marks_and_reset() {
        let mut session = open_session(&[100, 200, 50]);

        session.mark_deleted(2).unwrap();
        assert_eq!(session.stat(), (2, 150));
        assert_eq!(session.get(2), Err(Pop3Error::NoSuchMessage));
        assert_eq!(session.get(3).unwrap().identifier, "inbox/3.eml");

        // marking twice is harmless
        session.mark_deleted(2).unwrap();
        assert_eq!(session.mark_deleted(0), Err(Pop3Error::NoSuchMessage));
        assert_eq!(session.mark_deleted(4), Err(Pop3Error::NoSuchMessage));

        session.reset();
        assert_eq!(session.stat(), (3, 350));
        assert_eq!(session.marked().count(), 0);
    }

    #[test]
    fn test_begin_update_lists_marked_in_order() {
        let mut session = open_session(&[1, 2, 3, 4]);
        session.mark_deleted(3).unwrap();
        session.mark_deleted(2).unwrap();

        assert_eq!(session.begin_update(), vec!["inbox/2.eml", "inbox/3.eml"]);
        assert_eq!(session.phase(), Phase::Update);
    }

    #[test]
    fn test_begin_update_without_login_purges_nothing() {
        let mut session = Session::new();
        assert!(session.begin_update().is_empty());
        assert_eq!(session.phase(), Phase::Authorization);
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index(Some("3")), Ok(3));
        assert!(matches!(parse_index(Some("x")), Err(Pop3Error::InvalidArgument(_))));
        assert!(matches!(parse_index(Some("-1")), Err(Pop3Error::InvalidArgument(_))));
        assert!(matches!(parse_index(None), Err(Pop3Error::InvalidArgument(_))));
    }
}
