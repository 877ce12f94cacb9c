use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest timeout, delay or interval a policy can express (one day)
pub const MAX_POLICY_SECS: f64 = 86_400.0;

/// Timeout and retry parameters, hot-swappable on a live receiver
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LivenessPolicy {
    /// Silence allowed on a connected stream before it is torn down
    pub data_timeout_secs: f64,
    /// Wait between attempts to reopen a listener that failed to bind
    pub reconnect_delay_secs: f64,
    /// Upper bound on how long the receiver blocks in one recv
    pub poll_interval_ms: u64,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            data_timeout_secs: 2.0,
            reconnect_delay_secs: 1.0,
            poll_interval_ms: 20,
        }
    }
}

impl LivenessPolicy {
    pub fn data_timeout(&self) -> Duration {
        secs(self.data_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        secs(self.reconnect_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(1, 1000))
    }

    /// Describe the first field outside its usable range
    pub fn check(&self) -> Result<(), String> {
        if !(self.data_timeout_secs > 0.0 && self.data_timeout_secs <= MAX_POLICY_SECS) {
            return Err(format!(
                "liveness.data_timeout_secs must be within (0, {}], got {}",
                MAX_POLICY_SECS, self.data_timeout_secs
            ));
        }
        if !(self.reconnect_delay_secs >= 0.0 && self.reconnect_delay_secs <= MAX_POLICY_SECS) {
            return Err(format!(
                "liveness.reconnect_delay_secs must be within [0, {}], got {}",
                MAX_POLICY_SECS, self.reconnect_delay_secs
            ));
        }
        Ok(())
    }
}

/// Hello datagram sent to the peer until it starts streaming
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HandshakeConfig {
    pub token: String,
    #[serde(default = "default_handshake_interval")]
    pub interval_secs: f64,
}

fn default_handshake_interval() -> f64 {
    2.0
}

impl HandshakeConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            interval_secs: default_handshake_interval(),
        }
    }

    pub fn interval(&self) -> Duration {
        secs(self.interval_secs).max(Duration::from_millis(1))
    }
}

// Invalid values read as zero, huge ones as the cap
fn secs(value: f64) -> Duration {
    if value > 0.0 {
        Duration::from_secs_f64(value.min(MAX_POLICY_SECS))
    } else {
        Duration::ZERO
    }
}
