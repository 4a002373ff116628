//! Connection acceptor (C6)
//!
//! Binds a single TCP listener and, for every accepted connection, builds a
//! session bound to the raw (or TLS-terminated) stream and launches its
//! supervisor on a fresh task. TLS is enabled by setting both
//! `tls_cert_path` and `tls_key_path` in [`ServerSettings`]; otherwise the
//! listener serves plaintext. Each session's cancellation token is a child
//! of the listener's own, so on shutdown the accept loop exits, every live
//! session is cancelled in turn, and `run` waits for each spawned session
//! task to finish before returning.

use crate::config::ServerSettings;
use crate::session::{self, Session, SessionDeps};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Builds a TLS acceptor from a PEM certificate chain and private key file.
fn build_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("failed to open TLS cert file: {}", cert_path.display()))?;
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .with_context(|| format!("failed to parse TLS cert file: {}", cert_path.display()))?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }

    let key_file = File::open(key_path)
        .with_context(|| format!("failed to open TLS key file: {}", key_path.display()))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("failed to parse TLS key file: {}", key_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let config = TlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS server config")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Runs the accept loop until `cancel` fires, then waits for every live
/// session task to finish.
pub async fn run(
    settings: &ServerSettings,
    deps: Arc<SessionDeps>,
    cancel: tokio_util::sync::CancellationToken,
) -> Result<()> {
    let tls_acceptor = match (&settings.tls_cert_path, &settings.tls_key_path) {
        (Some(cert_path), Some(key_path)) => Some(build_tls_acceptor(cert_path, key_path)?),
        _ => None,
    };

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, tls = tls_acceptor.is_some(), "listening");

    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                stream.set_nodelay(true).ok();

                let deps = deps.clone();
                let tls_acceptor = tls_acceptor.clone();
                let session_cancel = cancel.clone();
                sessions.spawn(async move {
                    let remote_addr = remote_addr.to_string();
                    match tls_acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                let session = Session::new(remote_addr, deps, &session_cancel);
                                session::run(session, tls_stream).await;
                            }
                            Err(e) => {
                                tracing::warn!(remote = %remote_addr, error = %e, "TLS handshake failed");
                            }
                        },
                        None => {
                            let session = Session::new(remote_addr, deps, &session_cancel);
                            session::run(session, stream).await;
                        }
                    }
                });
            }
        }
    }

    drop(listener);
    while sessions.join_next().await.is_some() {}
    Ok(())
}
