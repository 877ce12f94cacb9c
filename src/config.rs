use crate::error::{RelayError, Result};
use crate::protocol::text::MAX_TRANSFORM_FLOATS;
use crate::protocol::{PacketDecoder, Protocol, ARKIT_BLENDSHAPES};
use crate::receiver::liveness::MAX_POLICY_SECS;
use crate::receiver::{HandshakeConfig, LivenessPolicy};
use crate::resampler::settings::{MAX_OUTPUT_HZ, MIN_OUTPUT_HZ};
use crate::resampler::ResamplerSettings;
use crate::smoothing_policy::derive_settings;
use crate::transport::{TransportFactory, UdpTransportFactory};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

/// Stream setup, loaded from JSON; every field is optional
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub protocol: Protocol,
    pub bind_ip: IpAddr,
    /// Falls back to the protocol's well-known port
    pub listen_port: Option<u16>,
    /// Device to send the hello to
    pub peer: Option<SocketAddr>,
    pub handshake: Option<HandshakeConfig>,
    pub liveness: LivenessPolicy,
    /// Normalized 0..1, 0 bypasses the resampler
    pub smoothing: f64,
    pub output_hz: f64,
    /// Blend shape layout for the text protocol
    pub blendshapes: Option<Vec<String>>,
    pub transform_len: usize,
    pub autoconnect: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Text,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: None,
            peer: None,
            handshake: None,
            liveness: LivenessPolicy::default(),
            smoothing: 0.5,
            output_hz: 60.0,
            blendshapes: None,
            transform_len: MAX_TRANSFORM_FLOATS,
            autoconnect: true,
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RelayError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: StreamConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_OUTPUT_HZ..=MAX_OUTPUT_HZ).contains(&self.output_hz) {
            return Err(invalid(format!(
                "output_hz must be within {}..={}, got {}",
                MIN_OUTPUT_HZ, MAX_OUTPUT_HZ, self.output_hz
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(invalid(format!("smoothing must be within 0..1, got {}", self.smoothing)));
        }
        self.liveness.check().map_err(invalid)?;
        if self.transform_len == 0 || self.transform_len > MAX_TRANSFORM_FLOATS {
            return Err(invalid(format!(
                "transform_len must be within 1..={}, got {}",
                MAX_TRANSFORM_FLOATS, self.transform_len
            )));
        }
        if let Some(handshake) = &self.handshake {
            if handshake.token.is_empty() {
                return Err(invalid("handshake token is empty".into()));
            }
            if !(handshake.interval_secs > 0.0 && handshake.interval_secs <= MAX_POLICY_SECS) {
                return Err(invalid(format!(
                    "handshake.interval_secs must be within (0, {}], got {}",
                    MAX_POLICY_SECS, handshake.interval_secs
                )));
            }
        }
        Ok(())
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
            .unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port())
    }

    pub fn blendshape_names(&self) -> Vec<String> {
        match &self.blendshapes {
            Some(names) => names.clone(),
            None => ARKIT_BLENDSHAPES.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn decoder(&self) -> Arc<dyn PacketDecoder> {
        self.protocol
            .decoder(self.blendshape_names(), self.transform_len)
    }

    pub fn transport_factory(&self) -> Arc<dyn TransportFactory> {
        Arc::new(UdpTransportFactory::new(self.listen_addr()))
    }

    pub fn resampler_settings(&self) -> ResamplerSettings {
        derive_settings(self.smoothing, self.output_hz)
    }
}

fn invalid(message: String) -> RelayError {
    RelayError::InvalidConfig(message)
}
