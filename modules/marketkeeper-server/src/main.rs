use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use marketkeeper_common::Config;
use marketkeeper_scheduler::Services;
use marketkeeper_server::{build_router, AppState};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("marketkeeper=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = Config::from_env()?;
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(%problem, "Invalid configuration");
        }
        anyhow::bail!("{} configuration problem(s)", problems.len());
    }
    config.log_redacted();

    let services = Arc::new(Services::from_config(&config)?);
    services.start();

    let state = Arc::new(AppState {
        services: services.clone(),
        cron_secret: config.cron_secret.clone(),
    });
    let app = build_router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("MarketKeeper starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    services.shutdown();
    Ok(())
}
