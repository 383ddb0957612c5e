use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::errors::{FusionError, FusionResult};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics` on `bind_addr`.
pub fn init(bind_addr: &str) -> FusionResult<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| FusionError::Config(format!("invalid metrics bind address '{bind_addr}': {e}")))?;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| FusionError::Config(format!("failed to install metrics recorder: {e}")))?;

    // Only the first call installs a recorder; later handles are dropped.
    let _ = PROM_HANDLE.set(handle);

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "metrics endpoint listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_bind_address() {
        assert!(matches!(init("not-an-addr"), Err(FusionError::Config(_))));
    }
}
