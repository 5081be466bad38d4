//! FlexLLama gateway — fronts a fleet of llama.cpp server processes behind a
//! single OpenAI-v1-compatible HTTP endpoint.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod catalog;
mod config;
mod error;
mod health;
mod proxy;
mod routes;
mod runner;
mod state;
mod supervisor;

use catalog::Catalog;
use config::Config;
use health::HealthAggregator;
use state::AppState;
use supervisor::Supervisor;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const HEALTH_TICK: Duration = Duration::from_secs(2);
const IDLE_UNLOAD_TICK: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn print_version() {
    println!("flexllama {VERSION}");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|idx| args.get(idx + 1))
        .map(std::path::PathBuf::from);

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = validate_config(&config) {
        tracing::error!(error = %e, "invalid configuration");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        runners = config.runners.len(),
        models = config.models.len(),
        "starting flexllama"
    );

    let catalog = Catalog::new(config.models.clone());
    let supervisor = Arc::new(Supervisor::new(&config, catalog));
    let health = Arc::new(HealthAggregator::new(supervisor.clone()));

    tokio::spawn(health.clone().run(HEALTH_TICK));
    tokio::spawn(idle_unload_loop(supervisor.clone()));

    if config.auto_start_runners {
        supervisor.autostart_defaults().await;
    }

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind API listener");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr, "listening");

    let state = Arc::new(AppState::new(config, supervisor.clone(), health));
    let app = Router::new()
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = serve.await {
        tracing::error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    tracing::info!("shutting down, stopping all runners");
    supervisor.shutdown(SHUTDOWN_GRACE).await;
    ExitCode::SUCCESS
}

fn validate_config(config: &Config) -> Result<(), error::Error> {
    for spec in &config.models {
        if !config.runners.contains_key(&spec.runner_id) {
            return Err(error::Error::Config(format!(
                "model '{}' is assigned to undeclared runner '{}'",
                spec.alias, spec.runner_id
            )));
        }
    }
    let mut ports = std::collections::HashSet::new();
    for runner in config.runners.values() {
        if !ports.insert((runner.listen_host.clone(), runner.listen_port)) {
            return Err(error::Error::Config(format!(
                "two runners are configured to listen on {}:{}",
                runner.listen_host, runner.listen_port
            )));
        }
    }
    Ok(())
}

async fn idle_unload_loop(supervisor: Arc<Supervisor>) {
    let mut ticker = tokio::time::interval(IDLE_UNLOAD_TICK);
    loop {
        ticker.tick().await;
        supervisor.tick_idle_unload().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
