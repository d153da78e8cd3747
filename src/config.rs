use clap::Parser;
use log::info;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::errors::ConfigError;
use crate::serial::{PortResolver, SerialSettings};

const DEFAULT_BAUD_RATE: u32 = 9600;

/// Command line options. Each may also come from the environment or `.env`.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Relay irrigation controller telemetry to Firebase")]
pub struct Args {
    /// Generate random readings instead of reading the controller
    #[arg(long, env = "AGRIBOT_SYNTHETIC")]
    pub synthetic: bool,

    /// Serial port of the controller, discovered when omitted
    #[arg(long, env = "AGRIBOT_PORT")]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, env = "AGRIBOT_BAUD")]
    pub baud: Option<u32>,

    #[arg(long, default_value_t = 1000)]
    pub read_timeout_ms: u64,

    /// Delay after opening the port while the controller resets
    #[arg(long, default_value_t = 2000)]
    pub settle_ms: u64,

    /// Delay between synthetic readings
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Account email used to sign in
    #[arg(long, env = "AGRIBOT_EMAIL")]
    pub email: Option<String>,

    /// TOML file holding the Firebase project configuration
    #[arg(long, env = "AGRIBOT_SECRETS", default_value = "secrets.toml")]
    pub secrets: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Extra attempts for a failed store write before giving up
    #[arg(long, default_value_t = 0)]
    pub sink_retries: u32,

    /// Write ON/OFF back to the controller after each reading
    #[arg(long)]
    pub echo_valve: bool,

    /// List serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Delete stored readings and valve status for the account, then exit
    #[arg(long)]
    pub purge: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMode {
    Device(SerialSettings),
    Synthetic { interval: Duration },
}

impl SourceMode {
    /// Pick the telemetry source from explicit options.
    ///
    /// The resolver is only consulted in device mode when no port was pinned.
    pub fn resolve(args: &Args, resolver: &dyn PortResolver) -> Result<Self, ConfigError> {
        if args.synthetic {
            return Ok(SourceMode::Synthetic {
                interval: Duration::from_millis(args.interval_ms),
            });
        }

        let path = match &args.port {
            Some(port) => port.clone(),
            None => resolver.discover()?,
        };

        Ok(SourceMode::Device(SerialSettings {
            path,
            baud_rate: args.baud.unwrap_or(DEFAULT_BAUD_RATE),
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            settle: Duration::from_millis(args.settle_ms),
        }))
    }
}

/// Account and store settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub email: String,
    pub secrets_path: PathBuf,
    pub request_timeout: Duration,
    pub sink_retries: u32,
    pub echo_valve: bool,
}

impl Settings {
    pub fn resolve(args: &Args) -> Result<Self, ConfigError> {
        let email = args
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(ConfigError::Missing("email (--email or AGRIBOT_EMAIL)"))?
            .to_string();

        Ok(Settings {
            email,
            secrets_path: args.secrets.clone(),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            sink_retries: args.sink_retries,
            echo_valve: args.echo_valve,
        })
    }
}

#[derive(Deserialize)]
struct SecretsFile {
    firebase_config: FirebaseConfig,
}

#[derive(Deserialize)]
struct FirebaseConfig {
    #[serde(rename = "apiKey")]
    api_key: String,
    #[serde(rename = "databaseURL")]
    database_url: String,
}

/// Firebase project credentials shared by the authenticator and the store client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub database_url: Url,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("database_url", &self.database_url.as_str())
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: &str, database_url: &str) -> Result<Self, ConfigError> {
        let mut database_url = Url::parse(database_url.trim())?;

        // Paths are joined onto the base, which needs a trailing slash to keep its own path
        if !database_url.path().ends_with('/') {
            let path = format!("{}/", database_url.path());
            database_url.set_path(&path);
        }

        Ok(Credentials {
            api_key: api_key.trim().to_string(),
            database_url,
        })
    }

    /// Load credentials from the secrets file, or from the environment when the file is absent
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            return Self::from_toml(&text, path);
        }

        info!(
            "{} not found, reading Firebase config from the environment",
            path.display()
        );
        let api_key = env::var("FIREBASE_CONFIG_APIKEY")
            .map_err(|_| ConfigError::Missing("FIREBASE_CONFIG_APIKEY"))?;
        let database_url = env::var("FIREBASE_CONFIG_DATABASEURL")
            .map_err(|_| ConfigError::Missing("FIREBASE_CONFIG_DATABASEURL"))?;

        Self::new(&api_key, &database_url)
    }

    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let secrets: SecretsFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        Self::new(
            &secrets.firebase_config.api_key,
            &secrets.firebase_config.database_url,
        )
    }
}

/// Password from `AGRIBOT_PASSWORD`, or prompted on the terminal without echo
pub fn read_password(email: &str) -> Result<String, ConfigError> {
    password_from(env::var("AGRIBOT_PASSWORD").ok(), || {
        rpassword::prompt_password(format!("Password for {}: ", email))
    })
}

fn password_from<F>(preset: Option<String>, prompt: F) -> Result<String, ConfigError>
where
    F: FnOnce() -> io::Result<String>,
{
    match preset {
        Some(password) => Ok(password),
        None => prompt().map_err(ConfigError::Prompt),
    }
}
