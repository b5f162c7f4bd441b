use anyhow::{ Context, Result };
use async_trait::async_trait;
use aws_config::{ BehaviorVersion, Region };
use aws_sdk_s3::{
    self,
    config::{ Credentials, SharedCredentialsProvider },
    operation::get_object::GetObjectError,
    Client,
};
use tracing::debug;

use super::{ credentials, is_safe_segment, MailboxStore, MessageInfo, StoreError, StoreResult };

pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub prefix: String,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub force_path_style: bool,
}

/// Mailboxes kept in a bucket, laid out as
///
/// ```text
/// <prefix>/<domain>/passwd.txt
/// <prefix>/<domain>/<user>/<message objects>
/// ```
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub async fn new(cfg: S3Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &cfg.region {
            loader = loader.region(Region::new(region.clone()));
        }

        // Static keys when configured, the default provider chain otherwise
        if let (Some(access_key), Some(secret_key)) = (&cfg.access_key, &cfg.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                None, // session token
                None, // expiry
                "lightpop"
            );
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder
            ::from(&sdk_config)
            .force_path_style(cfg.force_path_style)
            .build();
        let client = Client::from_conf(s3_config);

        Self::test_connection(&client, &cfg.bucket).await?;

        Ok(Self {
            client,
            bucket: cfg.bucket,
            prefix: cfg.prefix.trim_matches('/').to_string(),
        })
    }

    async fn test_connection(client: &Client, bucket: &str) -> Result<()> {
        client
            .head_bucket()
            .bucket(bucket)
            .send().await
            .with_context(|| format!("Failed to connect to bucket: {}", bucket))?;
        debug!("Successfully connected to S3 bucket: {}", bucket);
        Ok(())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key(&self, parts: &[&str]) -> String {
        object_key(&self.prefix, parts)
    }

    /// Fetches an object, `None` when the key does not exist.
    async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!("Getting object bytes: {} from bucket: {}", key, self.bucket);

        let response = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(is_missing) => {
                debug!("Object does not exist: {}", key);
                return Ok(None);
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("Failed to get object: {}", key)));
            }
        };

        let bytes = response.body
            .collect().await
            .context("Failed to collect response body")?
            .to_vec();

        debug!("Successfully retrieved object bytes: {} ({} bytes)", key, bytes.len());
        Ok(Some(bytes))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        debug!("Deleting object: {} from bucket: {}", key, self.bucket);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send().await
            .with_context(|| format!("Failed to delete object: {}", key))?;

        debug!("Successfully deleted object: {}", key);
        Ok(())
    }

    /// Lists every object under `prefix` as `(key, size)`, following
    /// continuation tokens.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        debug!("Listing objects in bucket: {} with prefix: {}", self.bucket, prefix);

        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send().await
                .with_context(|| format!("Failed to list objects in bucket: {}", self.bucket))?;

            continuation = response.next_continuation_token.clone();

            objects.extend(
                response.contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|obj| {
                        let size = obj.size.unwrap_or(0).max(0) as u64;
                        obj.key.map(|key| (key, size))
                    })
            );

            if continuation.is_none() {
                break;
            }
        }

        debug!("Found {} objects in bucket: {}", objects.len(), self.bucket);
        Ok(objects)
    }
}

fn is_missing(err: &GetObjectError) -> bool {
    err.is_no_such_key()
}

/// Joins key segments with `/`, leaving out an empty prefix.
fn object_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = String::new();
    for part in std::iter::once(&prefix).chain(parts.iter()) {
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(part);
    }
    key
}

#[async_trait]
impl MailboxStore for S3Store {
    async fn authenticate(&self, user: &str, domain: &str, secret: &str) -> StoreResult<bool> {
        if !is_safe_segment(user) || !is_safe_segment(domain) {
            return Ok(false);
        }

        let key = self.key(&[domain, credentials::PASSWD_FILE]);
        let Some(bytes) = self.get_bytes(&key).await? else {
            debug!("No credential object at {}", key);
            return Ok(false);
        };
        let contents = String::from_utf8_lossy(&bytes);

        Ok(credentials::check_login(&contents, user, secret))
    }

    async fn enumerate(&self, user: &str, domain: &str) -> StoreResult<Vec<MessageInfo>> {
        if !is_safe_segment(user) || !is_safe_segment(domain) {
            return Ok(Vec::new());
        }

        // Trailing slash so "bob" does not also match "bobby"
        let prefix = format!("{}/", self.key(&[domain, user]));
        let messages = self
            .list_objects(&prefix).await?
            .into_iter()
            .filter(|(_, size)| *size > 0)
            .map(|(identifier, size)| MessageInfo { identifier, size })
            .collect();

        Ok(messages)
    }

    async fn read(&self, identifier: &str) -> StoreResult<Vec<u8>> {
        self.get_bytes(identifier).await?.ok_or_else(|| StoreError::NotFound(identifier.to_string()))
    }

    async fn delete(&self, identifier: &str) -> StoreResult<()> {
        Ok(self.delete_object(identifier).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("mail", &["example.com", "passwd.txt"]), "mail/example.com/passwd.txt");
        assert_eq!(object_key("", &["example.com", "bob"]), "example.com/bob");
        assert_eq!(object_key("a/b", &["c"]), "a/b/c");
    }

    #[test]
    fn test_only_missing_key_counts_as_absent() {
        use aws_sdk_s3::error::ErrorMetadata;
        use aws_sdk_s3::types::error::NoSuchKey;

        assert!(is_missing(&GetObjectError::NoSuchKey(NoSuchKey::builder().build())));

        let denied = ErrorMetadata::builder().code("AccessDenied").message("Access Denied").build();
        assert!(!is_missing(&GetObjectError::generic(denied)));
    }
}
