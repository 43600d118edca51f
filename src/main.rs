//! Audio Joiner - merge uploaded audio files in groups.
//!
//! This binary starts the HTTP server and configures all components.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use audio_joiner::{
    auth::{spawn_eviction, TokenStore},
    config::{CheckConfig, Cli, Command, ServeConfig, TOKEN_WATCH_INTERVAL},
    merge::{probe_tool, FfmpegConcatenator},
    server::{create_router, AppState, RouterConfig},
};

/// Log file name inside `LOG_DIR`.
const LOG_FILE_NAME: &str = "app.log";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    if let Err(e) = init_logging(config.verbose, config.log_dir.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Audio Joiner v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!(
        "  Limits: {} files, {} MB per file, {} MB per request",
        config.max_files, config.max_per_file_mb, config.max_content_length_mb
    );
    info!(
        "  Rate limit: {} requests per {}s",
        config.rate_limit_max, config.rate_limit_window
    );
    info!("  Merge workers: {}", config.merge_workers);
    match config.allowed_origin {
        Some(ref origin) => info!("  Allowed origin: {}", origin),
        None => info!("  Allowed origin: request Host"),
    }
    if config.trust_proxy_headers {
        info!("  Client address: X-Forwarded-For / X-Real-IP");
    }

    // Token store
    let token_path = config.token_file_path();
    let tokens = if config.tokens_required {
        match TokenStore::open(&token_path) {
            Ok(store) => {
                info!("  Auth: enabled ({} token(s) from {})", store.len(), token_path.display());
                Arc::new(store)
            }
            Err(e) => {
                error!("{}", e);
                error!("Token enforcement is enabled; create the file or set API_TOKENS_REQUIRED=false");
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!("  Auth: DISABLED - every request is trusted");
        let store = TokenStore::empty();
        if let Err(e) = store.load(&token_path) {
            debug!("No token file loaded: {}", e);
        }
        Arc::new(store)
    };

    // External tool
    let tool_available = probe_tool(&config.tool_path).await;
    if tool_available {
        info!("  FFmpeg: {} (available)", config.tool_path.display());
    } else {
        error!(
            "  FFmpeg: {} NOT AVAILABLE - merge requests will fail",
            config.tool_path.display()
        );
    }

    let secret = match config.secret_key {
        Some(ref secret) => secret.clone(),
        None => {
            warn!("  SECRET_KEY not set; using a random key for this process");
            format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            )
        }
    };

    let router_config = build_router_config(&config, secret, tool_available);
    let concatenator = Arc::new(FfmpegConcatenator::new(
        config.tool_path.clone(),
        config.tool_timeout(),
    ));
    let state = AppState::new(&router_config, Arc::clone(&tokens), concatenator);

    spawn_eviction(Arc::clone(&state.limiter));
    spawn_token_watcher(Arc::clone(&tokens));

    let router = create_router(state, &router_config);
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/healthz", addr);
    info!("    curl -H 'Authorization: Bearer <token>' \\");
    info!("         -F count=2 -F files=@a.mp3 -F files=@b.mp3 \\");
    info!("         -o merged_files.zip http://{}/merge", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr; when `log_dir` is set a JSON copy is appended to
/// `<log_dir>/app.log`.
fn init_logging(verbose: bool, log_dir: Option<&Path>) -> std::io::Result<()> {
    let env_filter = if verbose {
        "audio_joiner=debug,tower_http=debug"
    } else {
        "audio_joiner=info,tower_http=info"
    };

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(LOG_FILE_NAME))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into()))
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig, secret: String, tool_available: bool) -> RouterConfig {
    let mut router_config = RouterConfig::new(secret)
        .with_tokens_required(config.tokens_required)
        .with_limits(config.upload_limits())
        .with_rate_limit(config.rate_window(), config.rate_limit_max)
        .with_merge_workers(config.merge_workers)
        .with_tool_available(tool_available)
        .with_geo_enabled(config.geo_lookup_enabled)
        .with_trust_proxy_headers(config.trust_proxy_headers)
        .with_tracing(!config.no_tracing);

    if let Some(ref origin) = config.allowed_origin {
        router_config = router_config.with_allowed_origin(origin.clone());
    }

    router_config
}

/// Reload the token file whenever its modification time advances.
fn spawn_token_watcher(tokens: Arc<TokenStore>) {
    if tokens.path().is_none() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TOKEN_WATCH_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = tokens.reload_if_changed() {
                warn!("Token file check failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        if let Err(e) = init_logging(true, None) {
            eprintln!("Failed to initialize logging: {}", e);
        }
    }

    println!("Audio Joiner Configuration Check");
    println!("═════════════════════════════════");
    println!();

    let mut ok = true;

    print!("Testing FFmpeg ({})... ", config.tool_path.display());
    if probe_tool(&config.tool_path).await {
        println!("✓ available");
    } else {
        println!("✗ not available");
        println!("  Install FFmpeg or set FFMPEG_PATH to its location.");
        ok = false;
    }

    let token_path = config.token_file_path();
    print!("Reading tokens ({})... ", token_path.display());
    match TokenStore::open(&token_path) {
        Ok(store) => {
            println!("✓ {} token(s)", store.len());
            if store.is_empty() && config.tokens_required {
                println!("  Warning: token file is empty; only browser uploads will be accepted.");
            }
        }
        Err(e) if config.tokens_required => {
            println!("✗ failed");
            println!("  {}", e);
            ok = false;
        }
        Err(_) => {
            println!("- not found (token enforcement disabled)");
        }
    }

    println!();
    println!("═════════════════════════════════");
    if ok {
        println!("✓ All checks passed!");
        ExitCode::SUCCESS
    } else {
        println!("✗ Some checks failed");
        ExitCode::FAILURE
    }
}
