//! Configuration for the SCCP and IAX2 stacks.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration bundle, one section per layer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignallingConfig {
    pub sccp: SccpConfig,
    pub management: ManagementConfig,
    pub iax: IaxConfig,
}

/// SCCP layer configuration (§3.1, §4.2-§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SccpConfig {
    /// Local subsystem number.
    pub local_ssn: u8,
    /// Local Global Title digits, if this node originates GT-addressed
    /// messages.
    pub global_title: Option<String>,
    /// Global Title Indicator (1-4 ITU, 1-2 ANSI).
    pub gti: u8,
    /// Translation type.
    pub translation_type: u8,
    /// Numbering plan (§3.1).
    pub numbering_plan: u8,
    /// Nature of address (§3.1).
    pub nature_of_address: u8,
    /// Whether encoded addresses should carry a point code.
    pub include_pc: bool,
    /// Reassembly timeout for incomplete segmented messages, 5-20s (§4.3).
    pub reassembly_timeout_ms: u64,
    /// Hop counter ceiling applied to originated messages (§4.4).
    pub hop_counter: u8,
}

/// SCCP Management configuration (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// Initial Subsystem-Status-Test retry interval.
    pub sst_initial_interval_ms: u64,
    /// Ceiling the SST backoff interval is capped at (20 minutes per spec).
    pub sst_max_interval_ms: u64,
    /// Interval used while a subsystem is `IgnoreTests`.
    pub ignore_tests_interval_ms: u64,
    /// Coordinated-withdrawal SOR/SOG round-trip timer.
    pub coordination_timer_ms: u64,
    /// When set, subsystem-failure events are counted and the offending
    /// SSN recorded in an unknown-subsystem map (§8 scenario S6), mirroring
    /// the original's `extended-monitoring` toggle.
    pub extended_monitoring: bool,
}

/// IAX2 layer configuration (§4.7-§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IaxConfig {
    /// UDP bind address.
    pub bind_address: String,
    /// UDP bind port, default 4569.
    pub port: u16,
    /// Number of transaction buckets the engine dispatches complete
    /// transactions across (§4.7's round-robin `getEvent` drain).
    pub bucket_count: usize,
    /// Whether inbound New/RegReq/RegRel/Poke frames must carry a valid
    /// call token before a transaction is created (§4.8).
    pub require_call_token: bool,
    /// Maximum age, in seconds, of an accepted call-token secret.
    pub call_token_max_age_secs: u64,
    /// Outbound timestamp adjust-over threshold, ms (§4.10).
    pub adjust_ts_out_threshold_ms: u32,
    /// Outbound timestamp adjust-over ceiling, ms (§4.10).
    pub adjust_ts_out_over_ms: u32,
    /// Outbound timestamp adjust-under ceiling, ms (§4.10).
    pub adjust_ts_out_under_ms: u32,
    /// Trunk meta-frame send cadence, ms (§4.7, §3.2).
    pub trunk_send_interval_ms: u64,
}

impl Default for SccpConfig {
    fn default() -> Self {
        Self {
            local_ssn: 8,
            global_title: None,
            gti: 4,
            translation_type: 0,
            numbering_plan: 1,
            nature_of_address: 4,
            include_pc: false,
            reassembly_timeout_ms: 10_000,
            hop_counter: 15,
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            sst_initial_interval_ms: 5_000,
            sst_max_interval_ms: 20 * 60 * 1000,
            ignore_tests_interval_ms: 1_000,
            coordination_timer_ms: 1_000,
            extended_monitoring: false,
        }
    }
}

impl Default for IaxConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: crate::DEFAULT_IAX_PORT,
            bucket_count: 64,
            require_call_token: true,
            call_token_max_age_secs: 10,
            adjust_ts_out_threshold_ms: 120,
            adjust_ts_out_over_ms: 120,
            adjust_ts_out_under_ms: 60,
            trunk_send_interval_ms: 2,
        }
    }
}

impl SignallingConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

impl SccpConfig {
    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }
}

impl ManagementConfig {
    pub fn sst_initial_interval(&self) -> Duration {
        Duration::from_millis(self.sst_initial_interval_ms)
    }

    pub fn sst_max_interval(&self) -> Duration {
        Duration::from_millis(self.sst_max_interval_ms)
    }
}

impl IaxConfig {
    pub fn trunk_send_interval(&self) -> Duration {
        Duration::from_millis(self.trunk_send_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let cfg = SignallingConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: SignallingConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.sccp.local_ssn, cfg.sccp.local_ssn);
        assert_eq!(back.iax.port, crate::DEFAULT_IAX_PORT);
    }

    #[test]
    fn sst_backoff_is_capped_below_original_ceiling() {
        let cfg = ManagementConfig::default();
        assert!(cfg.sst_max_interval() <= Duration::from_secs(20 * 60));
    }
}
