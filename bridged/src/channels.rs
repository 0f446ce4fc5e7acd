// Channel registry: path prefix -> backend service endpoint
//
// Built once at startup from configuration and immutable afterwards.

use ghostbridge_shared::types::{ChannelConfig, ChannelType};
use std::collections::HashMap;

pub struct ChannelRegistry {
    channels: HashMap<ChannelType, ChannelConfig>,
}

impl ChannelRegistry {
    pub fn new(configs: Vec<ChannelConfig>) -> Self {
        let mut channels = HashMap::new();
        for config in configs {
            channels.insert(config.channel_type, config);
        }
        Self { channels }
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<&ChannelConfig> {
        self.channels.get(&channel_type)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.channels.keys().copied().collect()
    }
}

/// Where a parsed request path leads
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// `/zns/<operation>` with any query string stripped
    Zns { operation: String, query: String },
    /// `/<channel>/<tail>` forwarded to a backend endpoint
    Channel { channel_type: ChannelType, path: String },
    Unknown,
}

/// Parse a request path into its routing target. The first segment
/// selects the channel; `/zns/*` is handled in-process.
pub fn parse_route(path: &str) -> Route {
    let (path, query) = match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    };
    let trimmed = path.trim_start_matches('/');
    let (first, rest) = match trimmed.split_once('/') {
        Some((first, rest)) => (first, rest),
        None => (trimmed, ""),
    };

    if first == "zns" {
        return Route::Zns {
            operation: rest.trim_end_matches('/').to_string(),
            query: query.to_string(),
        };
    }
    match ChannelType::from_path_segment(first) {
        Some(channel_type) => Route::Channel {
            channel_type,
            path: path.to_string(),
        },
        None => Route::Unknown,
    }
}
