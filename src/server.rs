use std::net::SocketAddr;
use std::sync::Arc;

use crate::authz::AuthzState;
use crate::errors::WardenError;
use crate::settings::Settings;

/// Bind the configured address and serve the authorization API until the
/// listener fails.
pub async fn serve(settings: &Settings, state: Arc<AuthzState>) -> Result<(), WardenError> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| WardenError::Other(format!("bad listen addr: {e}")))?;

    let router = crate::authz::web::router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Authorization API listening");

    axum::serve(listener, router).await?;
    Ok(())
}
