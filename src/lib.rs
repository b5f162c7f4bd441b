//! POP3 (RFC 1939) server with pluggable mailbox storage.
//!
//! The protocol engine in [`protocol::pop3`] is written once against the
//! [`storage::MailboxStore`] trait; [`storage::filesystem`] and
//! [`storage::s3`] are thin adapters.

pub mod protocol;
pub mod runtime;
pub mod storage;
pub mod utils;
