// GhostBridge Shared - Common types and crypto
//
// This crate contains shared functionality used across the GhostBridge gateway:
// - Canonical domain/record data model and wire shapes
// - Channel and transport descriptors for the multiplexer
// - Ed25519 domain signatures over the canonical encoding

pub mod types;
pub mod crypto;

// Re-export commonly used items
pub use types::*;

use anyhow::Result;
use tracing::info;

/// Initialize the shared library
pub fn init() -> Result<()> {
    info!("🔧 Initializing GhostBridge Shared library");
    Ok(())
}

/// Get shared library version
pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
