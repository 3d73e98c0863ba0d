//! Deployment configuration.
//!
//! Loaded once at boot: an optional JSON file named by `ORDER_INTAKE_CONFIG`,
//! then `ORDER_INTAKE_*` environment variables on top of it.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::coordinator::IntakeSettings;
use crate::error::{Error, Result};
use crate::extract::DEFAULT_CHAT_ENDPOINT;
use crate::headers::HeaderStrategy;
use crate::insertion::InsertionPolicy;
use crate::record::RecordLayout;
use crate::schema::{CanonicalSchema, DEFAULT_FIXED_COLUMNS, ReservedNames};
use crate::timestamp::{SEOUL_OFFSET_MINUTES, TimestampFormat, TimestampStyle};

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_VAR: &str = "ORDER_INTAKE_CONFIG";

/// Collection id used by the local backends when none is configured.
pub const LOCAL_COLLECTION_ID: &str = "local";

/// Where tabs and attachments live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Google Sheets for rows, Google Drive for attachments.
    Google,
    /// Everything in process memory; lost on exit.
    #[default]
    Memory,
    /// In-memory rows persisted to a snapshot file, attachments in memory.
    Snapshot,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub endpoint: String,
    pub model: String,
    /// Free-text extraction is disabled while this is unset.
    pub api_key: Option<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Configuration for the intake service.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    /// Spreadsheet every manager tab lives in.
    pub spreadsheet_id: Option<String>,
    /// Drive folder uploaded attachments are placed in.
    pub drive_folder: Option<String>,
    pub header_strategy: HeaderStrategy,
    pub insertion_policy: InsertionPolicy,
    pub record_layout: RecordLayout,
    /// Overrides the standard fixed columns.
    pub fixed_columns: Option<Vec<String>>,
    pub reserved: ReservedNames,
    pub timestamp_offset_minutes: i32,
    pub timestamp_style: TimestampStyle,
    pub bind_addr: String,
    /// Seeds the credential state at boot.
    pub access_token: Option<String>,
    /// When set, `POST /auth/token` requires it in `x-callback-secret`.
    pub callback_secret: Option<String>,
    pub snapshot_path: PathBuf,
    pub extractor: ExtractorConfig,
    pub http_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            spreadsheet_id: None,
            drive_folder: None,
            header_strategy: HeaderStrategy::default(),
            insertion_policy: InsertionPolicy::default(),
            record_layout: RecordLayout::default(),
            fixed_columns: None,
            reserved: ReservedNames::default(),
            timestamp_offset_minutes: SEOUL_OFFSET_MINUTES,
            timestamp_style: TimestampStyle::default(),
            bind_addr: "127.0.0.1:3000".to_string(),
            access_token: None,
            callback_secret: None,
            snapshot_path: PathBuf::from("orders.bin.gz"),
            extractor: ExtractorConfig::default(),
            http_timeout_secs: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("backend", &self.backend)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("drive_folder", &self.drive_folder)
            .field("header_strategy", &self.header_strategy)
            .field("insertion_policy", &self.insertion_policy)
            .field("record_layout", &self.record_layout)
            .field("fixed_columns", &self.fixed_columns)
            .field("reserved", &self.reserved)
            .field("timestamp_offset_minutes", &self.timestamp_offset_minutes)
            .field("timestamp_style", &self.timestamp_style)
            .field("bind_addr", &self.bind_addr)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "callback_secret",
                &self.callback_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("snapshot_path", &self.snapshot_path)
            .field("extractor", &self.extractor)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Loads the file named by `ORDER_INTAKE_CONFIG` (if set) and applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed, an
    /// override has an invalid value, or the result fails validation.
    pub fn load() -> Result<Self> {
        let mut config = match env_string(CONFIG_PATH_VAR) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("cannot read {path}: {e}")))?;
                Self::from_json(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(env_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON config document; absent fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    /// Applies `ORDER_INTAKE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ORDER_INTAKE_BACKEND") {
            self.backend = parse_named("ORDER_INTAKE_BACKEND", &v)?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_SPREADSHEET_ID") {
            self.spreadsheet_id = Some(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_DRIVE_FOLDER") {
            self.drive_folder = Some(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_HEADER_STRATEGY") {
            self.header_strategy = parse_named("ORDER_INTAKE_HEADER_STRATEGY", &v)?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_INSERTION_POLICY") {
            self.insertion_policy = parse_named("ORDER_INTAKE_INSERTION_POLICY", &v)?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_RECORD_LAYOUT") {
            self.record_layout = parse_named("ORDER_INTAKE_RECORD_LAYOUT", &v)?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_FIXED_COLUMNS") {
            self.fixed_columns = Some(
                v.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(v) = lookup("ORDER_INTAKE_TIMESTAMP_OFFSET_MINUTES") {
            self.timestamp_offset_minutes = v.parse().map_err(|e| {
                Error::Config(format!("ORDER_INTAKE_TIMESTAMP_OFFSET_MINUTES must be an integer: {e}"))
            })?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_TIMESTAMP_STYLE") {
            self.timestamp_style = parse_named("ORDER_INTAKE_TIMESTAMP_STYLE", &v)?;
        }
        if let Some(v) = lookup("ORDER_INTAKE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("ORDER_INTAKE_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_CALLBACK_SECRET") {
            self.callback_secret = Some(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_EXTRACTOR_ENDPOINT") {
            self.extractor.endpoint = v;
        }
        if let Some(v) = lookup("ORDER_INTAKE_EXTRACTOR_MODEL") {
            self.extractor.model = v;
        }
        if let Some(v) = lookup("ORDER_INTAKE_EXTRACTOR_API_KEY") {
            self.extractor.api_key = Some(v);
        }
        if let Some(v) = lookup("ORDER_INTAKE_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = Some(v.parse().map_err(|e| {
                Error::Config(format!("ORDER_INTAKE_HTTP_TIMEOUT_SECS must be a u64: {e}"))
            })?);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when the Google backend has no spreadsheet
    /// id or the reserved column names collide.
    pub fn validate(&self) -> Result<()> {
        if self.backend == Backend::Google
            && self
                .spreadsheet_id
                .as_deref()
                .is_none_or(|id| id.trim().is_empty())
        {
            return Err(Error::Config(
                "ORDER_INTAKE_SPREADSHEET_ID is required for the google backend".to_string(),
            ));
        }
        if self.reserved.attachment.trim().is_empty()
            || self.reserved.timestamp.trim().is_empty()
            || self.reserved.attachment == self.reserved.timestamp
        {
            return Err(Error::Config(
                "reserved column names must be distinct and non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Spreadsheet id every tab is addressed under.
    pub fn collection_id(&self) -> String {
        self.spreadsheet_id
            .clone()
            .unwrap_or_else(|| LOCAL_COLLECTION_ID.to_string())
    }

    /// Only the Google backend needs an access token.
    pub fn requires_auth(&self) -> bool {
        self.backend == Backend::Google
    }

    pub fn http_timeout(&self) -> Option<Duration> {
        self.http_timeout_secs.map(Duration::from_secs)
    }

    pub fn canonical_schema(&self) -> CanonicalSchema {
        let fixed = match &self.fixed_columns {
            Some(columns) if !columns.is_empty() => columns.clone(),
            _ => DEFAULT_FIXED_COLUMNS.iter().map(|c| c.to_string()).collect(),
        };
        CanonicalSchema::new(fixed, self.reserved.clone())
    }

    pub fn intake_settings(&self) -> IntakeSettings {
        IntakeSettings {
            canonical: self.canonical_schema(),
            header_strategy: self.header_strategy,
            insertion_policy: self.insertion_policy,
            record_layout: self.record_layout,
            timestamps: TimestampFormat::new(self.timestamp_offset_minutes, self.timestamp_style),
            attachment_folder: self.drive_folder.clone(),
        }
    }
}

/// Reads an environment variable, treating blank values as unset.
fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parses an override through the same names the config file uses.
fn parse_named<T: DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    serde_json::from_value(Value::String(value.trim().to_ascii_lowercase()))
        .map_err(|e| Error::Config(format!("{name} has an unknown value '{value}': {e}")))
}
