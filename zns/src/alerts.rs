// Declarative alerting over the metrics report
//
// A rule fires when its predicate becomes true and is not already active,
// and resolves once the predicate turns false. Every firing dispatches one
// notification per configured channel.

use ghostbridge_shared::types::now_unix_secs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::metrics::{HealthState, MetricsReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    ErrorRateAbove(f64),
    ResponseTimeAbove(f64),
    CacheHitRateBelow(f64),
    MemoryUsageAbove(u64),
    HealthDegraded,
}

impl AlertCondition {
    pub fn is_met(&self, report: &MetricsReport) -> bool {
        match self {
            AlertCondition::ErrorRateAbove(threshold) => report.error_rate > *threshold,
            AlertCondition::ResponseTimeAbove(ms) => report.avg_resolution_time_ms > *ms,
            AlertCondition::CacheHitRateBelow(threshold) => {
                // Meaningless until the cache has been consulted
                report.cache_hits + report.cache_misses > 0
                    && report.cache_hit_rate < *threshold
            }
            AlertCondition::MemoryUsageAbove(bytes) => report.memory_usage_bytes > *bytes,
            AlertCondition::HealthDegraded => report.health != HealthState::Healthy,
        }
    }

    fn describe(&self, report: &MetricsReport) -> String {
        match self {
            AlertCondition::ErrorRateAbove(t) => {
                format!("error rate {:.2}% above {:.2}%", report.error_rate * 100.0, t * 100.0)
            }
            AlertCondition::ResponseTimeAbove(ms) => format!(
                "avg response time {:.0}ms above {:.0}ms",
                report.avg_resolution_time_ms, ms
            ),
            AlertCondition::CacheHitRateBelow(t) => format!(
                "cache hit rate {:.2}% below {:.2}%",
                report.cache_hit_rate * 100.0,
                t * 100.0
            ),
            AlertCondition::MemoryUsageAbove(bytes) => {
                format!("memory usage {} above {} bytes", report.memory_usage_bytes, bytes)
            }
            AlertCondition::HealthDegraded => format!("health is {:?}", report.health),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Webhook(String),
    Email(String),
    Slack(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub condition: AlertCondition,
    pub channels: Vec<AlertChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub rule_name: String,
    pub message: String,
    pub fired_at: u64,
}

/// Fire/resolve transitions produced by one evaluation pass
#[derive(Debug, Clone, PartialEq)]
pub enum AlertTransition {
    Fired { rule_name: String, message: String },
    Resolved { rule_name: String },
}

pub struct AlertManager {
    rules: Vec<AlertRule>,
    active: RwLock<HashMap<String, ActiveAlert>>,
    client: reqwest::Client,
}

impl AlertManager {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            active: RwLock::new(HashMap::new()),
            client: reqwest::Client::new(),
        }
    }

    /// A sensible default rule set wired to log-only channels
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            AlertRule {
                name: "high_error_rate".to_string(),
                condition: AlertCondition::ErrorRateAbove(0.10),
                channels: vec![],
            },
            AlertRule {
                name: "slow_resolution".to_string(),
                condition: AlertCondition::ResponseTimeAbove(5_000.0),
                channels: vec![],
            },
            AlertRule {
                name: "health_degraded".to_string(),
                condition: AlertCondition::HealthDegraded,
                channels: vec![],
            },
        ])
    }

    /// Evaluate every rule against the report, mutating the active set.
    /// Returns the transitions so the caller can dispatch notifications.
    pub fn evaluate(&self, report: &MetricsReport) -> Vec<AlertTransition> {
        let mut transitions = Vec::new();
        let mut active = self.active.write();

        for rule in &self.rules {
            let met = rule.condition.is_met(report);
            let currently_active = active.contains_key(&rule.name);
            if met && !currently_active {
                let message = rule.condition.describe(report);
                active.insert(
                    rule.name.clone(),
                    ActiveAlert {
                        rule_name: rule.name.clone(),
                        message: message.clone(),
                        fired_at: now_unix_secs(),
                    },
                );
                transitions.push(AlertTransition::Fired {
                    rule_name: rule.name.clone(),
                    message,
                });
            } else if !met && currently_active {
                active.remove(&rule.name);
                transitions.push(AlertTransition::Resolved {
                    rule_name: rule.name.clone(),
                });
            }
        }
        transitions
    }

    /// Dispatch one notification per channel for every transition
    pub async fn dispatch(&self, transitions: &[AlertTransition]) {
        for transition in transitions {
            let (rule_name, body) = match transition {
                AlertTransition::Fired { rule_name, message } => {
                    warn!("🚨 Alert fired: {} ({})", rule_name, message);
                    (rule_name, format!("ALERT {}: {}", rule_name, message))
                }
                AlertTransition::Resolved { rule_name } => {
                    info!("✅ Alert resolved: {}", rule_name);
                    (rule_name, format!("RESOLVED {}", rule_name))
                }
            };

            let Some(rule) = self.rules.iter().find(|r| &r.name == rule_name) else {
                continue;
            };
            for channel in &rule.channels {
                self.notify(channel, &body).await;
            }
        }
    }

    async fn notify(&self, channel: &AlertChannel, body: &str) {
        match channel {
            AlertChannel::Webhook(url) => {
                let payload = serde_json::json!({ "text": body });
                if let Err(e) = self.client.post(url).json(&payload).send().await {
                    warn!("Alert webhook delivery failed: {}", e);
                }
            }
            // Mail and slack transports are not wired up; the alert still
            // lands in the log stream.
            AlertChannel::Email(address) => {
                warn!("📧 [alert -> {}] {}", address, body);
            }
            AlertChannel::Slack(channel) => {
                warn!("💬 [alert -> {}] {}", channel, body);
            }
        }
    }

    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.active.read().values().cloned().collect()
    }
}
