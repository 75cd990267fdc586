use anyhow::Context;
use crm_migration_engine::config::ServerConfig;
use crm_migration_engine::{api, bootstrap, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().map_err(anyhow::Error::msg)?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    init_tracing(&config.log_dir()).map_err(anyhow::Error::msg)?;

    let controller = bootstrap(&config).context("starting migration engine")?;
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, "listening");

    axum::serve(listener, api::router(controller))
        .await
        .context("http server stopped")?;
    Ok(())
}
