mod api;
mod bootstrap;
mod channels;
mod cli;
mod dispatcher;
mod llm_http;
mod persistence_http;
mod plugin_host;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};
use rb_domain::config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("run-broker {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rb_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("run-broker starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let cors_layer = build_cors_layer(&config.server.cors);

    let max_concurrent =
        std::env::var("RUNTIME_MAX_CONCURRENT_REQUESTS").ok().and_then(|v| v.parse::<usize>().ok()).unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(requests_per_second = rl.requests_per_second, burst_size = rl.burst_size, "per-IP rate limiting enabled");

        GovernorLayer { config: Arc::new(gov_config) }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    let router = api::router().layer(cors_layer).layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer { router.layer(gov).with_state(state.clone()) } else { router.with_state(state.clone()) };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "run-broker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    state.core.broker.close();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

/// One configured `server.cors.allowed_origins` entry, sorted into what kind
/// of match it needs at request time.
enum OriginRule {
    Exact(HeaderValue),
    PortWildcard(String),
}

fn classify_origins(raw: &[String]) -> Vec<OriginRule> {
    raw.iter()
        .filter_map(|origin| {
            if let Some(host) = origin.strip_suffix(":*") {
                Some(OriginRule::PortWildcard(format!("{host}:")))
            } else {
                match origin.parse::<HeaderValue>() {
                    Ok(hv) => Some(OriginRule::Exact(hv)),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                        None
                    }
                }
            }
        })
        .collect()
}

fn origin_matches(rules: &[OriginRule], candidate: &HeaderValue) -> bool {
    let candidate_str = candidate.to_str().unwrap_or("");
    rules.iter().any(|rule| match rule {
        OriginRule::Exact(hv) => hv.as_bytes() == candidate.as_bytes(),
        OriginRule::PortWildcard(host_prefix) => candidate_str
            .strip_prefix(host_prefix.as_str())
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
    })
}

/// Turns `server.cors.allowed_origins` into a [`CorsLayer`]. A port segment
/// may be written as `*` (e.g. `http://localhost:*`) to admit any port on
/// that host; a lone `"*"` entry drops all origin checking entirely.
fn build_cors_layer(cors: &rb_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if cors.allowed_origins == ["*"] {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new().allow_origin(tower_http::cors::Any).allow_methods(methods).allow_headers(headers);
    }

    let rules = classify_origins(&cors.allowed_origins);
    let exact_only: Option<Vec<HeaderValue>> = rules
        .iter()
        .map(|r| match r {
            OriginRule::Exact(hv) => Some(hv.clone()),
            OriginRule::PortWildcard(_) => None,
        })
        .collect();

    let allow_origin = match exact_only {
        Some(list) => AllowOrigin::list(list),
        None => AllowOrigin::predicate(move |candidate, _| origin_matches(&rules, candidate)),
    };

    CorsLayer::new().allow_origin(allow_origin).allow_methods(methods).allow_headers(headers).allow_credentials(true)
}
