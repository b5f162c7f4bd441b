use sha2::{ Digest, Sha512 };
use tracing::warn;

/// Name of the per-domain credential file, shared by every backend.
pub const PASSWD_FILE: &str = "passwd.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
}

impl Credential {
    pub fn verify(&self, secret: &str) -> bool {
        hash_secret(&self.username, secret).eq_ignore_ascii_case(self.password_hash.trim())
    }
}

/// SHA-512 of `"<user>:<secret>"` as lowercase hex.
pub fn hash_secret(user: &str, secret: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(format!("{}:{}", user, secret).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parses a `user:hexdigest` per line credential file.
pub fn parse_passwd(contents: &str) -> Vec<Credential> {
    let mut credentials = Vec::new();

    for (line_number, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match trimmed.split_once(':') {
            Some((user, hash)) if !user.is_empty() && !hash.is_empty() => {
                credentials.push(Credential {
                    username: user.trim().to_string(),
                    password_hash: hash.trim().to_string(),
                });
            }
            _ => warn!("Malformed credential entry at line {}", line_number + 1),
        }
    }

    credentials
}

/// Looks `user` up in a credential file and checks `secret` against it.
pub fn check_login(contents: &str, user: &str, secret: &str) -> bool {
    parse_passwd(contents)
        .iter()
        .find(|c| c.username == user)
        .map(|c| c.verify(secret))
        .unwrap_or(false)
}
