use anyhow::{ Context, Result };
use std::collections::HashMap;
use std::path::Path;
use tracing::{ debug, error, warn };

// Constants
const MAX_SECTIONS: usize = 100;
const MAX_ENTRIES_PER_SECTION: usize = 100;

/// Environment variables understood by earlier deployments, mapped onto
/// `(section, key)`.
const LEGACY_ENV: &[(&str, &str, &str)] = &[
    ("email_folder", "filesystem", "root"),
    ("awskey", "s3", "access_key"),
    ("awssecret", "s3", "secret_key"),
    ("bucket", "s3", "bucket"),
    ("prefix", "s3", "prefix"),
];

// Types
pub type ConfigValue = String;
pub type ConfigSection = HashMap<String, ConfigValue>;

#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: HashMap<String, ConfigSection>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            sections: HashMap::new(),
        }
    }

    pub fn set_value(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        if section.is_empty() || key.is_empty() {
            return Err(anyhow::anyhow!("Section or key cannot be empty"));
        }

        if !self.sections.contains_key(section) && self.sections.len() >= MAX_SECTIONS {
            return Err(anyhow::anyhow!("Maximum number of sections ({}) reached", MAX_SECTIONS));
        }

        let section_map = self.sections.entry(section.to_string()).or_default();

        if !section_map.contains_key(key) && section_map.len() >= MAX_ENTRIES_PER_SECTION {
            return Err(
                anyhow::anyhow!(
                    "Maximum entries per section ({}) reached for section '{}'",
                    MAX_ENTRIES_PER_SECTION,
                    section
                )
            );
        }

        if key.contains("secret") || key.contains("password") {
            debug!("Setting config: [{}] {} = ****", section, key);
        } else {
            debug!("Setting config: [{}] {} = {}", section, key, value);
        }
        section_map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn get_value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|section_map| section_map.get(key))
            .map(|v| v.as_str())
    }

    pub fn get_int(&self, section: &str, key: &str, default: i32) -> i32 {
        match self.get_value(section, key) {
            Some(val) =>
                match val.parse::<i32>() {
                    Ok(num) => num,
                    Err(_) => {
                        warn!(
                            "Invalid integer value '{}' for {}.{}, using default {}",
                            val,
                            section,
                            key,
                            default
                        );
                        default
                    }
                }
            None => {
                debug!("Using default value {} for {}.{}", default, section, key);
                default
            }
        }
    }

    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_value(section, key) {
            Some(val) => {
                let lower_val = val.to_lowercase();
                match lower_val.as_str() {
                    "1" | "true" | "yes" | "on" | "enabled" => true,
                    "0" | "false" | "no" | "off" | "disabled" => false,
                    _ => {
                        warn!(
                            "Invalid boolean value '{}' for {}.{}, using default {}",
                            val,
                            section,
                            key,
                            default
                        );
                        default
                    }
                }
            }
            None => {
                debug!("Using default value {} for {}.{}", default, section, key);
                default
            }
        }
    }

    pub fn is_section_exists(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Overlays values from the environment: the legacy variable names, then
    /// `LIGHTPOP_<SECTION>_<KEY>` for any key already known or listed above.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()> where F: Fn(&str) -> Option<String> {
        for (var, section, key) in LEGACY_ENV {
            if let Some(value) = lookup(*var).filter(|v| !v.is_empty()) {
                self.set_value(section, key, &value)?;
            }
        }

        let mut known: Vec<(String, String)> = LEGACY_ENV.iter()
            .map(|(_, section, key)| (section.to_string(), key.to_string()))
            .collect();
        for (section, entries) in &self.sections {
            known.extend(entries.keys().map(|key| (section.clone(), key.clone())));
        }
        for (section, key) in [
            ("storage", "backend"),
            ("pop3", "bind"),
            ("pop3", "port"),
            ("pop3", "idle_timeout"),
            ("pop3", "max_connections"),
            ("logging", "level"),
            ("logging", "json"),
        ] {
            known.push((section.to_string(), key.to_string()));
        }

        for (section, key) in known {
            let var = format!("LIGHTPOP_{}_{}", section.to_uppercase(), key.to_uppercase());
            if let Some(value) = lookup(&var) {
                self.set_value(&section, &key, &value)?;
            }
        }
        Ok(())
    }
}

// Config loader
pub struct ConfigLoader {
    path: String,
}

impl ConfigLoader {
    pub fn new(path: String) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Result<Config> {
        let filepath = self.path.trim();

        let config_path = Path::new(filepath);
        if !config_path.exists() {
            return Err(anyhow::anyhow!("Config file does not exist: {}", filepath));
        }
        if !config_path.is_file() {
            return Err(anyhow::anyhow!("Config path is not a regular file: {}", filepath));
        }

        let contents = tokio::fs
            ::read_to_string(config_path).await
            .with_context(|| format!("Failed to read config file: {}", filepath))?;

        Ok(Self::parse_config(&contents))
    }

    pub fn parse_config(contents: &str) -> Config {
        let mut config = Config::new();
        let mut current_section = String::new();

        for (index, line) in contents.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Check for section header: [section]
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                let section = &trimmed[1..trimmed.len() - 1];
                current_section = section.trim().to_string();
                if current_section.is_empty() {
                    warn!("Empty section name at line {}", line_number);
                }
                continue;
            }

            // Parse key-value pair
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();

                if key.is_empty() {
                    warn!("Empty key at line {}", line_number);
                    continue;
                }

                let value = Self::unquote_value(value);

                if current_section.is_empty() {
                    warn!("Key-value pair '{}' outside of section at line {}", key, line_number);
                    continue;
                }

                if let Err(e) = config.set_value(&current_section, key, &value) {
                    error!("Failed to set config value at line {}: {}", line_number, e);
                }
            } else {
                warn!("Invalid config line (no '=' found) at line {}: {}", line_number, trimmed);
            }
        }

        config
    }

    fn unquote_value(value: &str) -> String {
        let trimmed = value.trim();

        for quote in ['"', '\''] {
            if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
                return trimmed[1..trimmed.len() - 1].to_string();
            }
        }

        trimmed.to_string()
    }
}
