//! Configuration management for the audio joiner.
//!
//! Configuration is assembled once at startup from command-line arguments
//! and environment variables, validated, and passed down explicitly.
//!
//! # Example
//!
//! ```ignore
//! use audio_joiner::config::{Cli, Command};
//! use clap::Parser;
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Check(config) => println!("Checking {}", config.tool_path.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `HOST` - Server bind address (default: 0.0.0.0)
//! - `PORT` - Server port (default: 5001)
//! - `ALLOWED_ORIGIN` - Origin accepted for browser uploads (default: request Host)
//! - `SECRET_KEY` - Secret for anti-forgery tokens (default: random per process)
//! - `LOG_DIR` - Directory for the JSON log file (default: stderr only)
//! - `TOKEN_DIR` - Directory holding the token file (default: ./tokens)
//! - `TOKEN_FILE_PATH` - Token file (default: `<TOKEN_DIR>/allowed_tokens.txt`)
//! - `API_TOKENS_REQUIRED` - Enforce authentication (default: true)
//! - `GEO_LOOKUP_ENABLED` - Reported by `/api/health` (default: false)
//! - `MAX_FILES` - Files per request (default: 50)
//! - `MAX_PER_FILE_MB` - Per-file limit (default: 50)
//! - `MAX_CONTENT_LENGTH_MB` - Request limit (default: 100)
//! - `RATE_LIMIT_WINDOW` - Window length in seconds (default: 60)
//! - `RATE_LIMIT_MAX` - Requests per window (default: 20)
//! - `MERGE_WORKERS` - Concurrent groups per request (default: 4)
//! - `FFMPEG_PATH` - FFmpeg executable (default: ffmpeg)
//! - `FFMPEG_TIMEOUT` - Per-group timeout in seconds (default: 300)
//! - `TRUST_PROXY_HEADERS` - Use `X-Forwarded-For` / `X-Real-IP` (default: false)

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::auth::{DEFAULT_TOKEN_FILE_NAME, DEFAULT_RATE_MAX, DEFAULT_RATE_WINDOW};
use crate::merge::{
    UploadLimits, DEFAULT_MAX_CONTENT_LENGTH_MB, DEFAULT_MAX_FILES, DEFAULT_MAX_PER_FILE_MB,
    DEFAULT_MERGE_WORKERS, DEFAULT_TOOL_PATH, DEFAULT_TOOL_TIMEOUT,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5001;

/// Default directory holding the token file.
pub const DEFAULT_TOKEN_DIR: &str = "./tokens";

/// How often `serve` checks the token file for changes.
pub const TOKEN_WATCH_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// CLI Arguments
// =============================================================================

/// Audio Joiner - merge uploaded audio files in groups.
///
/// Accepts batches of audio files over HTTP, joins every `count` consecutive
/// files into one MP3 with FFmpeg, and returns the results as a ZIP archive.
#[derive(Parser, Debug, Clone)]
#[command(name = "audio-joiner")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for the default `serve` command
    #[command(flatten)]
    pub serve: ServeConfig,
}

impl Cli {
    /// Resolve the command to run; `serve` when none is given.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve(ServeConfig),

    /// Verify FFmpeg and the token file without starting the server
    Check(CheckConfig),
}

/// Configuration for the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Origin accepted for browser uploads, e.g. `https://joiner.example.com`.
    ///
    /// When unset, the request's `Host` header is used.
    #[arg(long, env = "ALLOWED_ORIGIN")]
    pub allowed_origin: Option<String>,

    /// Trust `X-Forwarded-For` / `X-Real-IP` when resolving the client address.
    ///
    /// Only enable behind a reverse proxy that overwrites these headers.
    #[arg(
        long,
        env = "TRUST_PROXY_HEADERS",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub trust_proxy_headers: bool,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Secret key for signing anti-forgery tokens.
    ///
    /// If not provided, a random key is generated per process and browser
    /// forms stop working across restarts.
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Directory containing the token file.
    #[arg(long, default_value = DEFAULT_TOKEN_DIR, env = "TOKEN_DIR")]
    pub token_dir: PathBuf,

    /// Token file, one token per line.
    #[arg(long, env = "TOKEN_FILE_PATH")]
    pub token_file: Option<PathBuf>,

    /// Require a bearer token or same-origin CSRF token.
    ///
    /// WARNING: when disabled every request is trusted.
    #[arg(
        long,
        env = "API_TOKENS_REQUIRED",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub tokens_required: bool,

    /// Report geolocation support in `/api/health`.
    #[arg(
        long,
        env = "GEO_LOOKUP_ENABLED",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub geo_lookup_enabled: bool,

    // =========================================================================
    // Upload Limits
    // =========================================================================
    /// Maximum number of files per request.
    #[arg(long, default_value_t = DEFAULT_MAX_FILES, env = "MAX_FILES")]
    pub max_files: usize,

    /// Maximum size of a single file in megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PER_FILE_MB, env = "MAX_PER_FILE_MB")]
    pub max_per_file_mb: u64,

    /// Maximum size of a whole request in megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_CONTENT_LENGTH_MB, env = "MAX_CONTENT_LENGTH_MB")]
    pub max_content_length_mb: u64,

    // =========================================================================
    // Rate Limiting
    // =========================================================================
    /// Rate-limit window length in seconds.
    #[arg(long, default_value_t = DEFAULT_RATE_WINDOW.as_secs(), env = "RATE_LIMIT_WINDOW")]
    pub rate_limit_window: u64,

    /// Requests admitted per window per client.
    #[arg(long, default_value_t = DEFAULT_RATE_MAX, env = "RATE_LIMIT_MAX")]
    pub rate_limit_max: u32,

    // =========================================================================
    // Merge Configuration
    // =========================================================================
    /// Groups processed concurrently per request.
    #[arg(long, default_value_t = DEFAULT_MERGE_WORKERS, env = "MERGE_WORKERS")]
    pub merge_workers: usize,

    /// FFmpeg executable.
    #[arg(long, default_value = DEFAULT_TOOL_PATH, env = "FFMPEG_PATH")]
    pub tool_path: PathBuf,

    /// Per-group FFmpeg timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TOOL_TIMEOUT.as_secs(), env = "FFMPEG_TIMEOUT")]
    pub tool_timeout: u64,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Directory for the JSON log file `app.log`.
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("max_files", self.max_files as u64),
            ("max_per_file_mb", self.max_per_file_mb),
            ("max_content_length_mb", self.max_content_length_mb),
            ("rate_limit_window", self.rate_limit_window),
            ("rate_limit_max", u64::from(self.rate_limit_max)),
            ("merge_workers", self.merge_workers as u64),
            ("tool_timeout", self.tool_timeout),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(format!("{} must be greater than 0", name));
        }

        if self.max_per_file_mb > self.max_content_length_mb {
            return Err(format!(
                "max_per_file_mb ({}) must not exceed max_content_length_mb ({})",
                self.max_per_file_mb, self.max_content_length_mb
            ));
        }

        if let Some(ref origin) = self.allowed_origin {
            validate_origin(origin)?;
        }

        if matches!(self.secret_key.as_deref(), Some(s) if s.is_empty()) {
            return Err("SECRET_KEY must not be empty when set".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Token file path, defaulting to `<token_dir>/allowed_tokens.txt`.
    pub fn token_file_path(&self) -> PathBuf {
        resolve_token_file(self.token_file.as_ref(), &self.token_dir)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits::from_megabytes(
            self.max_files,
            self.max_per_file_mb,
            self.max_content_length_mb,
        )
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout)
    }
}

/// Configuration for the `check` command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// FFmpeg executable.
    #[arg(long, default_value = DEFAULT_TOOL_PATH, env = "FFMPEG_PATH")]
    pub tool_path: PathBuf,

    /// Directory containing the token file.
    #[arg(long, default_value = DEFAULT_TOKEN_DIR, env = "TOKEN_DIR")]
    pub token_dir: PathBuf,

    /// Token file, one token per line.
    #[arg(long, env = "TOKEN_FILE_PATH")]
    pub token_file: Option<PathBuf>,

    /// Whether a missing token file is an error.
    #[arg(
        long,
        env = "API_TOKENS_REQUIRED",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub tokens_required: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn token_file_path(&self) -> PathBuf {
        resolve_token_file(self.token_file.as_ref(), &self.token_dir)
    }
}

fn resolve_token_file(explicit: Option<&PathBuf>, dir: &std::path::Path) -> PathBuf {
    explicit
        .cloned()
        .unwrap_or_else(|| dir.join(DEFAULT_TOKEN_FILE_NAME))
}

fn validate_origin(origin: &str) -> Result<(), String> {
    let url = url::Url::parse(origin)
        .map_err(|e| format!("ALLOWED_ORIGIN '{}' is not a valid URL: {}", origin, e))?;
    if url.host_str().is_none() {
        return Err(format!("ALLOWED_ORIGIN '{}' has no host", origin));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
