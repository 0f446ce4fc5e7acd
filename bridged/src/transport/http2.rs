// HTTP/2-over-TLS listener
//
// TCP accept loop; each TLS stream serves hyper HTTP/2, and every request
// becomes one framed unit through the multiplexer.

use anyhow::{Context, Result};
use ghostbridge_shared::types::{ConnectionInfo, TransportKind};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::multiplexer::{GatewayRequest, Multiplexer};
use crate::transport::{server_crypto, TlsIdentity};

/// Concurrent stream cap per connection, matching the QUIC transport
const MAX_CONCURRENT_STREAMS: u32 = 100;

pub struct Http2Listener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    multiplexer: Arc<Multiplexer>,
}

impl Http2Listener {
    /// Bind the TCP socket and prepare the TLS acceptor. Bind and TLS
    /// setup failures are fatal startup errors.
    pub async fn bind(
        addr: SocketAddr,
        identity: &TlsIdentity,
        multiplexer: Arc<Multiplexer>,
    ) -> Result<Self> {
        let crypto = server_crypto(identity, &[b"h2"])?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind HTTP/2 listener on {}", addr))?;
        info!("🌐 HTTP/2 listener bound on {}", addr);
        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(crypto)),
            multiplexer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; exits when the shutdown signal flips
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("HTTP/2 listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("HTTP/2 accept error: {}", e);
                            continue;
                        }
                    };

                    let info = ConnectionInfo::new(TransportKind::Http2, &peer.to_string());
                    if !self.multiplexer.try_register_connection(info.clone()) {
                        drop(stream);
                        continue;
                    }

                    let multiplexer = self.multiplexer.clone();
                    let acceptor = self.acceptor.clone();
                    tokio::spawn(async move {
                        handle_connection(multiplexer.clone(), acceptor, stream, peer, &info.id)
                            .await;
                        multiplexer.unregister_connection(&info.id);
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    multiplexer: Arc<Multiplexer>,
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    connection_id: &str,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("TLS handshake failed for {}: {}", peer, e);
            return;
        }
    };

    let client_id = peer.ip().to_string();
    let service = service_fn(move |request: Request<Incoming>| {
        let multiplexer = multiplexer.clone();
        let client_id = client_id.clone();
        async move {
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_else(|| request.uri().path().to_string());

            let body = match request.into_body().collect().await {
                Ok(collected) => collected.to_bytes().to_vec(),
                Err(e) => {
                    debug!("Failed to read request body: {}", e);
                    return Ok::<_, hyper::Error>(plain_response(
                        StatusCode::BAD_REQUEST,
                        b"{\"error\":{\"code\":\"UNSPECIFIED\",\"message\":\"Unreadable body\"}}"
                            .to_vec(),
                    ));
                }
            };

            let response = multiplexer
                .dispatch(GatewayRequest {
                    path,
                    body,
                    client_id,
                })
                .await;

            let status =
                StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok(plain_response(status, response.body))
        }
    });

    if let Err(e) = http2::Builder::new(TokioExecutor::new())
        .max_concurrent_streams(MAX_CONCURRENT_STREAMS)
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        debug!("HTTP/2 connection {} closed: {}", connection_id, e);
    }
}

fn plain_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
