use std::sync::Arc;

use anyhow::Result;
use choreclock::oauth::OAuth2Provider;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = choreclock::app_config::load()?;
    choreclock::app_tracing::init(&config)?;

    let provider = Arc::new(OAuth2Provider::new(&config)?);
    let app = choreclock::router(&config, provider).await?;

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!("listening on {}", config.addr);

    axum::serve(listener, app).await?;
    Ok(())
}
