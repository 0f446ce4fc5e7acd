// HTTP/3 (QUIC) listener
//
// Quinn endpoint with one bincode-framed request/response unit per
// bidirectional stream. Stream and idle limits follow the transport
// configuration; connections past the process cap are refused.

use anyhow::{Context, Result};
use ghostbridge_shared::types::{ConnectionInfo, TransportKind};
use quinn::{Connection, Endpoint, ServerConfig, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::multiplexer::{GatewayRequest, GatewayResponse, Multiplexer};
use crate::transport::{server_crypto, FrameRequest, FrameResponse, TlsIdentity, MAX_FRAME_BYTES};

const ALPN: &[u8] = b"ghostbridge";
const MAX_CONCURRENT_STREAMS: u32 = 100;

pub struct Http3Listener {
    endpoint: Endpoint,
    multiplexer: Arc<Multiplexer>,
}

impl Http3Listener {
    /// Bind the UDP endpoint. Bind and TLS setup failures are fatal
    /// startup errors.
    pub fn bind(
        addr: SocketAddr,
        identity: &TlsIdentity,
        multiplexer: Arc<Multiplexer>,
    ) -> Result<Self> {
        let crypto = server_crypto(identity, &[ALPN])?;

        let mut transport = TransportConfig::default();
        transport.max_concurrent_bidi_streams(MAX_CONCURRENT_STREAMS.into());
        transport.max_concurrent_uni_streams(0u32.into());
        transport.max_idle_timeout(Some(Duration::from_secs(30).try_into()?));
        transport.keep_alive_interval(Some(Duration::from_secs(5)));

        let mut server_config = ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport));

        let endpoint = Endpoint::server(server_config, addr)
            .with_context(|| format!("Failed to bind HTTP/3 listener on {}", addr))?;
        info!("🚀 HTTP/3 listener bound on {}", addr);
        Ok(Self {
            endpoint,
            multiplexer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accept loop; exits when the shutdown signal flips
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("HTTP/3 listener shutting down");
                    break;
                }
                incoming = self.endpoint.accept() => {
                    let Some(connecting) = incoming else { break };
                    let multiplexer = self.multiplexer.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        match connecting.await {
                            Ok(connection) => {
                                handle_connection(multiplexer, connection, shutdown).await;
                            }
                            Err(e) => debug!("QUIC handshake failed: {}", e),
                        }
                    });
                }
            }
        }
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

async fn handle_connection(
    multiplexer: Arc<Multiplexer>,
    connection: Connection,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = connection.remote_address();
    let info = ConnectionInfo::new(TransportKind::Http3, &peer.to_string());
    if !multiplexer.try_register_connection(info.clone()) {
        connection.close(1u32.into(), b"connection limit reached");
        return;
    }

    let client_id = peer.ip().to_string();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                connection.close(0u32.into(), b"shutdown");
                break;
            }
            stream = connection.accept_bi() => {
                match stream {
                    Ok((send, recv)) => {
                        let multiplexer = multiplexer.clone();
                        let client_id = client_id.clone();
                        tokio::spawn(async move {
                            handle_stream(multiplexer, send, recv, client_id).await;
                        });
                    }
                    Err(e) => {
                        debug!("QUIC connection {} closed: {}", peer, e);
                        break;
                    }
                }
            }
        }
    }
    multiplexer.unregister_connection(&info.id);
}

async fn handle_stream(
    multiplexer: Arc<Multiplexer>,
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    client_id: String,
) {
    let data = match recv.read_to_end(MAX_FRAME_BYTES).await {
        Ok(data) => data,
        Err(e) => {
            debug!("QUIC stream read failed: {}", e);
            return;
        }
    };

    let response = match bincode::deserialize::<FrameRequest>(&data) {
        Ok(frame) => {
            multiplexer
                .dispatch(GatewayRequest {
                    path: frame.path,
                    body: frame.body,
                    client_id,
                })
                .await
        }
        Err(e) => {
            debug!("Unparseable QUIC frame: {}", e);
            GatewayResponse {
                status: 400,
                body: b"{\"error\":{\"code\":\"UNSPECIFIED\",\"message\":\"Malformed frame\"}}"
                    .to_vec(),
            }
        }
    };

    let frame = FrameResponse {
        status: response.status,
        body: response.body,
    };
    let Ok(encoded) = bincode::serialize(&frame) else {
        return;
    };
    if let Err(e) = send.write_all(&encoded).await {
        debug!("QUIC stream write failed: {}", e);
        return;
    }
    if let Err(e) = send.finish().await {
        warn!("QUIC stream finish failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::transport::load_tls_identity;
    use zns::{ZnsConfig, ZnsService};

    fn test_multiplexer() -> Arc<Multiplexer> {
        let mut config = ZnsConfig::default();
        config.resolver.enable_dns_fallback = false;
        let zns = Arc::new(ZnsService::new(config).unwrap());
        Arc::new(Multiplexer::new(zns, ChannelRegistry::new(vec![]), 16, 5_000))
    }

    #[tokio::test]
    async fn test_bind_on_ephemeral_port() {
        let identity = load_tls_identity(&crate::config::NetworkConfig::default()).unwrap();
        let listener = Http3Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            &identity,
            test_multiplexer(),
        )
        .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
