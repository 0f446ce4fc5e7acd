// Upstream resolver adapters
//
// Every adapter implements the same trait with a tri-state contract:
//   None                     -> not my namespace, try the next resolver
//   Some(resp) with error    -> I own the namespace and failed; stop here
//   Some(resp) without error -> success

use async_trait::async_trait;
use ghostbridge_shared::types::{now_unix_millis, RecordType, ResolutionSource, ResolveResponse};
use parking_lot::Mutex;

pub mod dns;
pub mod ens;
pub mod native;
pub mod unstoppable;

pub use dns::DnsFallbackResolver;
pub use ens::EnsResolver;
pub use native::NativeResolver;
pub use unstoppable::UnstoppableResolver;

#[async_trait]
pub trait UpstreamResolver: Send + Sync {
    /// Stable adapter name, used in resolution chains and metrics
    fn name(&self) -> &'static str;

    /// Source stamped into responses produced by this adapter
    fn source(&self) -> ResolutionSource;

    async fn resolve(&self, domain: &str, record_types: &[RecordType])
        -> Option<ResolveResponse>;
}

/// Keep only the requested record types; an empty request means all
pub fn filter_records(
    records: Vec<ghostbridge_shared::types::DomainRecord>,
    record_types: &[RecordType],
) -> Vec<ghostbridge_shared::types::DomainRecord> {
    if record_types.is_empty() {
        return records;
    }
    records
        .into_iter()
        .filter(|r| record_types.contains(&r.record_type))
        .collect()
}

/// Process-wide requests-per-second gate used by the bridge adapters
pub struct RateGate {
    limit_per_second: u32,
    state: Mutex<(u64, u32)>,
}

impl RateGate {
    pub fn new(limit_per_second: u32) -> Self {
        Self {
            limit_per_second,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(now_unix_millis())
    }

    fn allow_at(&self, now_ms: u64) -> bool {
        let second = now_ms / 1_000;
        let mut state = self.state.lock();
        if state.0 != second {
            *state = (second, 0);
        }
        if state.1 >= self.limit_per_second {
            return false;
        }
        state.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghostbridge_shared::types::DomainRecord;

    #[test]
    fn test_filter_records() {
        let records = vec![
            DomainRecord::new(RecordType::A, "a.ghost", "10.0.0.1", 300),
            DomainRecord::new(RecordType::Txt, "a.ghost", "v=1", 300),
        ];
        let filtered = filter_records(records.clone(), &[RecordType::A]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].record_type, RecordType::A);

        let all = filter_records(records, &[]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_rate_gate_window() {
        let gate = RateGate::new(2);
        assert!(gate.allow_at(5_000));
        assert!(gate.allow_at(5_100));
        assert!(!gate.allow_at(5_900));
        // Next second opens a fresh window
        assert!(gate.allow_at(6_000));
    }
}
