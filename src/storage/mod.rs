pub mod credentials;
pub mod filesystem;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

/// A message as listed by a backend, before the session numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    /// Backend handle: a file path or an object key.
    pub identifier: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Storage capability consumed by the POP3 engine.
///
/// Implementations are shared between every connection, so they must be safe
/// for concurrent use. They carry no protocol knowledge: numbering, delete
/// marks and wire encoding all live in the session.
#[async_trait]
pub trait MailboxStore: Send + Sync {
    /// Checks `secret` against the credential stored for `user` in `domain`.
    async fn authenticate(&self, user: &str, domain: &str, secret: &str) -> StoreResult<bool>;

    /// Lists the messages of a mailbox in backend order. Zero length entries
    /// are directory markers and must not be returned.
    async fn enumerate(&self, user: &str, domain: &str) -> StoreResult<Vec<MessageInfo>>;

    /// Reads the full message (headers and body) as stored.
    async fn read(&self, identifier: &str) -> StoreResult<Vec<u8>>;

    async fn delete(&self, identifier: &str) -> StoreResult<()>;

    /// Stable unique id reported by UIDL.
    fn uid(&self, identifier: &str) -> String {
        base_name(identifier).to_string()
    }
}

/// Last path segment of `identifier` with its extension removed.
pub fn base_name(identifier: &str) -> &str {
    let name = identifier.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(identifier);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

/// True when `segment` can be used as a single path or key component.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(|c: char| c == '/' || c == '\\' || c.is_control())
}
