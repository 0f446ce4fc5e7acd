// Ingress transports
//
// Both listeners speak the same framing contract with the dispatcher:
// one (path, body) request unit in, one (status, body) response unit out,
// per stream.

use anyhow::{anyhow, Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::{Certificate, PrivateKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::config::NetworkConfig;

pub mod http2;
pub mod http3;

/// Largest request unit either transport will read
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Request unit on the QUIC transport (bincode on the wire)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRequest {
    pub path: String,
    pub body: Vec<u8>,
}

/// Response unit on the QUIC transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// TLS identity shared by both listeners; read-only after startup
#[derive(Clone)]
pub struct TlsIdentity {
    pub certs: Vec<Certificate>,
    pub key: PrivateKey,
}

/// Load the TLS identity. Configured files that fail to load are fatal;
/// with no files configured a self-signed dev identity is generated.
pub fn load_tls_identity(network: &NetworkConfig) -> Result<TlsIdentity> {
    match (&network.cert_file, &network.key_file) {
        (Some(cert_file), Some(key_file)) => load_from_files(cert_file, key_file),
        _ => {
            warn!("🔐 No TLS identity configured; generating a self-signed dev certificate");
            generate_dev_identity()
        }
    }
}

fn load_from_files(cert_path: &Path, key_path: &Path) -> Result<TlsIdentity> {
    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate {}", cert_path.display()))?;
    let certs: Vec<Certificate> = rustls_pemfile::certs(&mut &cert_pem[..])
        .with_context(|| format!("Failed to parse certificate {}", cert_path.display()))?
        .into_iter()
        .map(Certificate)
        .collect();
    if certs.is_empty() {
        return Err(anyhow!(
            "No certificates found in {}",
            cert_path.display()
        ));
    }

    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("Failed to read private key {}", key_path.display()))?;
    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut &key_pem[..])
        .with_context(|| format!("Failed to parse private key {}", key_path.display()))?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut &key_pem[..])
            .with_context(|| format!("Failed to parse private key {}", key_path.display()))?;
    }
    let key = keys
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No private key found in {}", key_path.display()))?;

    info!("🔐 Loaded TLS identity from {}", cert_path.display());
    Ok(TlsIdentity {
        certs,
        key: PrivateKey(key),
    })
}

fn generate_dev_identity() -> Result<TlsIdentity> {
    let cert = generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert_der = cert.serialize_der()?;
    let key_der = cert.serialize_private_key_der();
    Ok(TlsIdentity {
        certs: vec![Certificate(cert_der)],
        key: PrivateKey(key_der),
    })
}

/// rustls server config shared by both transports
pub fn server_crypto(identity: &TlsIdentity, alpn: &[&[u8]]) -> Result<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(identity.certs.clone(), identity.key.clone())?;
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}
