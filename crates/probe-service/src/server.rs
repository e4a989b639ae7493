//! Scrape endpoint listener.
//!
//! Plain HTTP goes through `axum::serve`. With TLS configured the same router
//! is served by `axum-server` over rustls. Either way the listener stops
//! accepting when the shutdown token fires and drains in-flight requests.

use crate::config::TlsSettings;
use crate::errors::ProbeError;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use rustls::crypto::CryptoProvider;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound on draining HTTPS connections after shutdown.
pub const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Load the certificate chain and private key for the HTTPS listener.
///
/// # Errors
///
/// Returns [`ProbeError::Tls`] if either file cannot be read or does not
/// hold usable PEM.
pub async fn load_tls(settings: &TlsSettings) -> Result<RustlsConfig, ProbeError> {
    install_crypto_provider();
    RustlsConfig::from_pem_file(&settings.certificate_path, &settings.key_path)
        .await
        .map_err(|e| {
            error!(
                target: "probe.http",
                certificate = %settings.certificate_path.display(),
                key = %settings.key_path.display(),
                error = %e,
                "Failed to load TLS certificate"
            );
            ProbeError::Tls(e)
        })
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns [`ProbeError::Http`] if the server fails while accepting.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls: Option<RustlsConfig>,
    shutdown: CancellationToken,
) -> Result<(), ProbeError> {
    let Some(tls) = tls else {
        return axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(ProbeError::Http);
    };

    let listener = listener.into_std().map_err(ProbeError::Http)?;
    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            info!(target: "probe.http", "Draining HTTPS connections");
            handle.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        }
    });

    axum_server::from_tcp_rustls(listener, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(ProbeError::Http)
}

/// rustls needs a process-wide provider once more than one backend is
/// compiled in.
fn install_crypto_provider() {
    if CryptoProvider::get_default().is_none()
        && rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
    {
        debug!(target: "probe.http", "Crypto provider already installed");
    }
}
