use std::sync::Arc;

use crate::{
    protocol,
    storage::{ filesystem::FsStore, s3, MailboxStore },
    utils::config::Config,
};

use tokio::sync::OnceCell;

/// Which [`MailboxStore`] the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Filesystem,
    S3,
}

impl StoreKind {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "filesystem" | "fs" => Ok(StoreKind::Filesystem),
            // "aws" is what older deployments pass on the command line
            "s3" | "aws" => Ok(StoreKind::S3),
            other => Err(anyhow::anyhow!("unsupported mail store: {}", other)),
        }
    }
}

pub struct Runtime {
    pub config: Arc<Config>,
    store: OnceCell<Arc<dyn MailboxStore>>,
}

impl Runtime {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config, store: OnceCell::const_new() }
    }

    pub fn store(&self) -> anyhow::Result<Arc<dyn MailboxStore>> {
        self.store
            .get()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Mailbox store not initialized"))
    }

    async fn init_store(&self) -> anyhow::Result<()> {
        let kind = StoreKind::parse(self.config.get_value("storage", "backend").unwrap_or("filesystem"))?;

        let store: Arc<dyn MailboxStore> = match kind {
            StoreKind::Filesystem => Arc::new(self.init_filesystem()?),
            StoreKind::S3 => Arc::new(self.init_s3().await?),
        };

        self.store.set(store).map_err(|_| anyhow::anyhow!("Mailbox store already initialized"))?;
        Ok(())
    }

    fn init_filesystem(&self) -> anyhow::Result<FsStore> {
        let root = self.config
            .get_value("filesystem", "root")
            .ok_or_else(|| anyhow::anyhow!("filesystem root not configured"))?;

        let store = FsStore::new(root);
        if !store.root().is_dir() {
            return Err(anyhow::anyhow!("Mail folder does not exist: {}", store.root().display()));
        }

        tracing::info!("Filesystem store initialized at {}", store.root().display());
        Ok(store)
    }

    async fn init_s3(&self) -> anyhow::Result<s3::S3Store> {
        if !self.config.is_section_exists("s3") {
            return Err(anyhow::anyhow!("S3 config not found"));
        }
        let bucket = self.config
            .get_value("s3", "bucket")
            .ok_or_else(|| anyhow::anyhow!("S3 bucket not configured"))?;

        let s3_config = s3::S3Config {
            endpoint: self.config.get_value("s3", "endpoint").map(str::to_string),
            bucket: bucket.to_string(),
            prefix: self.config.get_value("s3", "prefix").unwrap_or("").to_string(),
            region: self.config.get_value("s3", "region").map(str::to_string),
            access_key: self.config.get_value("s3", "access_key").map(str::to_string),
            secret_key: self.config.get_value("s3", "secret_key").map(str::to_string),
            force_path_style: self.config.get_bool("s3", "force_path_style", false),
        };

        let store = s3::S3Store
            ::new(s3_config).await
            .map_err(|e| anyhow::anyhow!("S3 init failed: {:#}", e))?;

        tracing::info!("S3 store initialized for bucket {}", store.bucket());
        Ok(store)
    }

    pub async fn run(self: Arc<Self>, tasks: &mut Vec<tokio::task::JoinHandle<()>>) -> anyhow::Result<()> {
        self.init_store().await?;

        let rt = Arc::clone(&self);
        tasks.push(
            tokio::spawn(async move {
                if let Err(e) = protocol::pop3::run_pop3(rt).await {
                    tracing::error!("POP3 server stopped: {:#}", e);
                }
            })
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!(StoreKind::parse("filesystem").unwrap(), StoreKind::Filesystem);
        assert_eq!(StoreKind::parse("AWS").unwrap(), StoreKind::S3);
        assert_eq!(StoreKind::parse(" s3 ").unwrap(), StoreKind::S3);
        assert!(StoreKind::parse("ftp").is_err());
    }

    #[tokio::test]
    async fn test_filesystem_store_requires_existing_root() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::new();
        config.set_value("storage", "backend", "filesystem").unwrap();
        config.set_value("filesystem", "root", &dir.path().join("missing").to_string_lossy()).unwrap();
        let runtime = Runtime::new(Arc::new(config));
        assert!(runtime.init_store().await.is_err());
        assert!(runtime.store().is_err());

        let mut config = Config::new();
        config.set_value("filesystem", "root", &dir.path().to_string_lossy()).unwrap();
        let runtime = Runtime::new(Arc::new(config));
        runtime.init_store().await.unwrap();
        assert!(runtime.store().is_ok());
    }
}
