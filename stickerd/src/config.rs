//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `STICKERD_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `STICKERD_` override YAML values
//! 3. **Provider credentials** - `OPENAI_API_KEY`, `SUPABASE_URL` and `SUPABASE_ANON_KEY` override
//!    `transform.api_key`, `supabase.url` and `supabase.anon_key`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `STICKERD_TRANSFORM__MAX_ATTEMPTS=3` sets the `transform.max_attempts` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use stickerd::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Supabase**: `supabase.url`, `supabase.anon_key` - shared by auth and storage
//! - **Authentication**: `auth.*` - session cookie settings
//! - **Storage**: `storage.backend`, `storage.bucket` - where stickers are written
//! - **Transform**: `transform.*` - image edit provider, model and retry policy
//! - **Imaging**: `imaging.max_dimension` - bounding box for uploads sent to the provider
//! - **Limits**: `limits.max_upload_bytes`
//! - **Features**: `enable_metrics`, `enable_otel_export`
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! STICKERD_PORT=8080
//! OPENAI_API_KEY=sk-...
//! SUPABASE_URL=https://abcd.supabase.co
//! STICKERD_STORAGE__BACKEND=memory
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "STICKERD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have defaults, so an empty file plus the three provider credentials is a working
/// configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Supabase project shared by auth and storage
    pub supabase: SupabaseConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub transform: TransformConfig,
    pub imaging: ImagingConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: Option<Url>,
    /// Public anon key, sent as `apikey` on every request
    #[serde(skip_serializing)]
    pub anon_key: Option<String>,
}

/// Session cookie and auth provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Session cookie name. Defaults to `sb-{project-ref}-auth-token`.
    pub cookie_name: Option<String>,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("Strict", "Lax", or "None")
    pub cookie_same_site: String,
    /// Max-Age of the session cookie
    #[serde(with = "humantime_serde")]
    pub session_max_age: Duration,
    /// Timeout for calls to the auth provider
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Supabase,
    /// In-process; objects vanish on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    /// `max-age` in seconds for stored objects
    pub cache_control: String,
    /// Overrides the storage service's public URL layout: `{public_base_url}/{bucket}/{path}`.
    /// Required for the memory backend.
    pub public_base_url: Option<Url>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    /// Echoes the resized input back, no network calls
    Dummy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub provider: TransformProviderKind,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Url,
    pub model: String,
    /// Output size requested from the provider
    pub size: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts including the first, only transient failures are retried
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagingConfig {
    /// Uploads are shrunk to fit a square of this size before the transform call
    pub max_dimension: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest accepted request body on the upload route
    pub max_upload_bytes: usize,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
///
/// The bundled UI is served from the same origin, so no origins are allowed by default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            supabase: SupabaseConfig::default(),
            auth: AuthConfig::default(),
            storage: StorageConfig::default(),
            transform: TransformConfig::default(),
            imaging: ImagingConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: None,
            cookie_secure: true,
            cookie_same_site: "Lax".to_string(),
            session_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Supabase,
            bucket: "uploads".to_string(),
            cache_control: "3600".to_string(),
            public_base_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            provider: TransformProviderKind::OpenAi,
            api_key: None,
            base_url: Url::parse("https://api.openai.com/v1").unwrap(),
            model: "gpt-image-1".to_string(),
            size: "1024x1024".to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self { max_dimension: 128 }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Internal {
        details: format!("Config validation: {}", message.into()),
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.body().details.unwrap_or_else(|| e.to_string())))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.supabase.url.is_none() {
            return Err(invalid(
                "supabase.url is not configured. Set SUPABASE_URL or add supabase.url to the config file.",
            ));
        }
        if self.supabase.anon_key.as_deref().is_none_or(|key| key.trim().is_empty()) {
            return Err(invalid(
                "supabase.anon_key is not configured. Set SUPABASE_ANON_KEY or add supabase.anon_key to the config file.",
            ));
        }

        if self.transform.provider == TransformProviderKind::OpenAi
            && self.transform.api_key.as_deref().is_none_or(|key| key.trim().is_empty())
        {
            return Err(invalid(
                "transform.api_key is not configured. Set OPENAI_API_KEY or use the dummy transform provider.",
            ));
        }

        if !(1..=10).contains(&self.transform.max_attempts) {
            return Err(invalid(format!(
                "transform.max_attempts must be between 1 and 10 (got {})",
                self.transform.max_attempts
            )));
        }

        if self.transform.timeout.is_zero() {
            return Err(invalid("transform.timeout must be greater than zero"));
        }

        if !(1..=4096).contains(&self.imaging.max_dimension) {
            return Err(invalid(format!(
                "imaging.max_dimension must be between 1 and 4096 (got {})",
                self.imaging.max_dimension
            )));
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(invalid("limits.max_upload_bytes must be greater than zero"));
        }

        if self.storage.backend == StorageBackend::Memory && self.storage.public_base_url.is_none() {
            return Err(invalid("storage.public_base_url is required for the memory storage backend"));
        }

        if self.cors.allow_credentials
            && self
                .cors
                .allowed_origins
                .iter()
                .any(|origin| matches!(origin, CorsOrigin::Wildcard))
        {
            return Err(invalid("cors.allowed_origins cannot contain '*' when cors.allow_credentials is set"));
        }

        match self.auth.cookie_same_site.to_ascii_lowercase().as_str() {
            "strict" | "lax" => {}
            "none" if self.auth.cookie_secure => {}
            "none" => return Err(invalid("auth.cookie_same_site None requires auth.cookie_secure")),
            other => {
                return Err(invalid(format!(
                    "auth.cookie_same_site must be Strict, Lax or None (got {other})"
                )));
            }
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values
            .merge(Env::prefixed("STICKERD_").ignore(&["config"]).split("__"))
            // Conventional provider credential variables
            .merge(
                Env::raw()
                    .only(&["OPENAI_API_KEY"])
                    .map(|_| "transform.api_key".into()),
            )
            .merge(Env::raw().only(&["SUPABASE_URL"]).map(|_| "supabase.url".into()))
            .merge(
                Env::raw()
                    .only(&["SUPABASE_ANON_KEY"])
                    .map(|_| "supabase.anon_key".into()),
            )
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session cookie name: configured, or derived from the Supabase project ref the same way
    /// the Supabase client libraries do.
    pub fn session_cookie_name(&self) -> String {
        if let Some(name) = &self.auth.cookie_name {
            return name.clone();
        }
        let project_ref = self
            .supabase
            .url
            .as_ref()
            .and_then(|url| url.host_str())
            .and_then(|host| host.split('.').next())
            .filter(|label| !label.is_empty());
        match project_ref {
            Some(project_ref) => format!("sb-{project_ref}-auth-token"),
            None => "sb-auth-token".to_string(),
        }
    }
}
