use std::io::ErrorKind;
use std::path::{ Path, PathBuf };

use async_trait::async_trait;
use tokio::fs;
use tracing::{ debug, warn };

use super::{ credentials, is_safe_segment, MailboxStore, MessageInfo, StoreError, StoreResult };

/// Mailboxes kept in a local folder:
///
/// ```text
/// <root>/<domain>/passwd.txt
/// <root>/<domain>/<user>/<message files>
/// ```
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn domain_dir(&self, domain: &str) -> Option<PathBuf> {
        is_safe_segment(domain).then(|| self.root.join(domain))
    }
}

#[async_trait]
impl MailboxStore for FsStore {
    async fn authenticate(&self, user: &str, domain: &str, secret: &str) -> StoreResult<bool> {
        let Some(dir) = self.domain_dir(domain) else {
            return Ok(false);
        };
        if !is_safe_segment(user) {
            return Ok(false);
        }

        let passwd = dir.join(credentials::PASSWD_FILE);
        let contents = match fs::read_to_string(&passwd).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No credential file at {}", passwd.display());
                return Ok(false);
            }
            Err(e) => {
                return Err(e.into());
            }
        };

        Ok(credentials::check_login(&contents, user, secret))
    }

    async fn enumerate(&self, user: &str, domain: &str) -> StoreResult<Vec<MessageInfo>> {
        let Some(dir) = self.domain_dir(domain) else {
            return Ok(Vec::new());
        };
        if !is_safe_segment(user) {
            return Ok(Vec::new());
        }
        let mailbox = dir.join(user);

        let mut entries = match fs::read_dir(&mailbox).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Mailbox folder {} does not exist, treating as empty", mailbox.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e.into());
            }
        };

        let mut messages = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if !metadata.is_file() || metadata.len() == 0 {
                continue;
            }
            messages.push(MessageInfo {
                identifier: entry.path().to_string_lossy().into_owned(),
                size: metadata.len(),
            });
        }

        // read_dir order is platform dependent
        messages.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        debug!("Found {} messages in {}", messages.len(), mailbox.display());
        Ok(messages)
    }

    async fn read(&self, identifier: &str) -> StoreResult<Vec<u8>> {
        match fs::read(identifier).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(identifier.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, identifier: &str) -> StoreResult<()> {
        debug!("Deleting message file {}", identifier);
        match fs::remove_file(identifier).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(identifier.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
