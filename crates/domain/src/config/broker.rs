use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run Broker tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning knobs for the Run Broker's bounded event log, retention sweep,
/// and idempotency window. Every field is clamped to its documented range
/// at deserialize time rather than merely validated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Max events retained per run's ring buffer. Clamp 100..5000.
    #[serde(default = "d_buffer_size", deserialize_with = "de_buffer_size")]
    pub run_event_buffer_size: usize,
    /// Idle time (no subscribers, terminal) before a run is swept. Min 60s.
    #[serde(default = "d_retention_ms", deserialize_with = "de_retention_ms")]
    pub run_retention_ms: u64,
    /// Sweep interval. Min 10s.
    #[serde(default = "d_cleanup_ms", deserialize_with = "de_cleanup_ms")]
    pub run_store_cleanup_interval_ms: u64,
    /// Idempotency key TTL. Min 10s.
    #[serde(default = "d_idempotency_ttl_ms", deserialize_with = "de_idempotency_ttl_ms")]
    pub run_idempotency_ttl_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            run_event_buffer_size: d_buffer_size(),
            run_retention_ms: d_retention_ms(),
            run_store_cleanup_interval_ms: d_cleanup_ms(),
            run_idempotency_ttl_ms: d_idempotency_ttl_ms(),
        }
    }
}

pub fn clamp_buffer_size(n: usize) -> usize {
    n.clamp(100, 5000)
}
pub fn clamp_retention_ms(n: u64) -> u64 {
    n.max(60_000)
}
pub fn clamp_cleanup_ms(n: u64) -> u64 {
    n.max(10_000)
}
pub fn clamp_idempotency_ttl_ms(n: u64) -> u64 {
    n.max(10_000)
}

fn d_buffer_size() -> usize {
    std::env::var("RUN_EVENT_BUFFER_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_buffer_size)
        .unwrap_or(1200)
}
fn d_retention_ms() -> u64 {
    std::env::var("RUN_RETENTION_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_retention_ms)
        .unwrap_or(30 * 60_000)
}
fn d_cleanup_ms() -> u64 {
    std::env::var("RUN_STORE_CLEANUP_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_cleanup_ms)
        .unwrap_or(30_000)
}
fn d_idempotency_ttl_ms() -> u64 {
    std::env::var("RUN_IDEMPOTENCY_TTL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(clamp_idempotency_ttl_ms)
        .unwrap_or(10 * 60_000)
}

fn de_buffer_size<'de, D>(d: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(clamp_buffer_size(usize::deserialize(d)?))
}
fn de_retention_ms<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(clamp_retention_ms(u64::deserialize(d)?))
}
fn de_cleanup_ms<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(clamp_cleanup_ms(u64::deserialize(d)?))
}
fn de_idempotency_ttl_ms<'de, D>(d: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(clamp_idempotency_ttl_ms(u64::deserialize(d)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_size_clamps_above_max() {
        assert_eq!(clamp_buffer_size(50_000), 5000);
    }

    #[test]
    fn buffer_size_clamps_below_min() {
        assert_eq!(clamp_buffer_size(1), 100);
    }

    #[test]
    fn retention_clamps_to_minimum() {
        assert_eq!(clamp_retention_ms(1000), 60_000);
    }

    #[test]
    fn deserialize_clamps_out_of_range_toml_value() {
        let cfg: BrokerConfig = toml::from_str("run_event_buffer_size = 99999").unwrap();
        assert_eq!(cfg.run_event_buffer_size, 5000);
    }
}
