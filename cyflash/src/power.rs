//! PDU outlet control for power-cycling the device under update.
//!
//! The switched PDU exposes a plain HTTP interface: a GET against
//! `{base}/outlet?{id}=OFF` or `{id}=ON` with basic auth toggles one
//! outlet. A cycle is OFF, a fixed dwell, then ON. Failures are reported
//! as [`Error::PowerCycle`] so callers can treat them as recoverable
//! (retry, or tell the operator to flip the outlet by hand) instead of
//! tearing down the whole run.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info};

use crate::error::{Error, Result};

/// Dwell between OFF and ON. The controller's standby rail needs a moment
/// to fully discharge or it will not re-latch.
pub const DEFAULT_OFF_TO_ON_DELAY: Duration = Duration::from_secs(1);

/// HTTP request timeout against the PDU.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// PDU endpoint and credentials.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PduConfig {
    /// Base URL of the PDU web interface, e.g. `http://192.168.0.100`.
    pub base_url: String,
    /// Outlet identifier as the PDU names it (usually a 1-based number).
    pub outlet: String,
    /// Basic-auth user.
    pub user: String,
    /// Basic-auth password.
    pub password: String,
    /// Dwell between OFF and ON.
    pub off_to_on_delay: Duration,
}

impl PduConfig {
    /// Config with the default dwell.
    pub fn new(
        base_url: impl Into<String>,
        outlet: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            outlet: outlet.into(),
            user: user.into(),
            password: password.into(),
            off_to_on_delay: DEFAULT_OFF_TO_ON_DELAY,
        }
    }
}

/// Outlet power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutletState {
    /// Outlet energized.
    On,
    /// Outlet de-energized.
    Off,
}

impl OutletState {
    fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

/// HTTP client for one PDU outlet.
pub struct PowerCycler {
    config: PduConfig,
    agent: ureq::Agent,
}

impl PowerCycler {
    /// Build a cycler for the configured outlet.
    pub fn new(config: PduConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .build();
        Self { config, agent }
    }

    /// Set one outlet state.
    pub fn set_outlet(&self, state: OutletState) -> Result<()> {
        let url = outlet_url(&self.config.base_url, &self.config.outlet, state);
        debug!("PDU request: GET {url}");
        self.agent
            .get(&url)
            .set("Authorization", &basic_auth(&self.config.user, &self.config.password))
            .call()
            .map_err(|e| Error::PowerCycle(format!("PDU request to {url} failed: {e}")))?;
        Ok(())
    }

    /// Full power cycle: OFF, dwell, ON.
    pub fn cycle(&self) -> Result<()> {
        info!("Power-cycling outlet {}", self.config.outlet);
        self.set_outlet(OutletState::Off)?;
        std::thread::sleep(self.config.off_to_on_delay);
        self.set_outlet(OutletState::On)?;
        Ok(())
    }
}

fn outlet_url(base: &str, outlet: &str, state: OutletState) -> String {
    format!("{}/outlet?{}={}", base.trim_end_matches('/'), outlet, state.as_str())
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outlet_url_shape() {
        assert_eq!(
            outlet_url("http://192.168.0.100", "1", OutletState::Off),
            "http://192.168.0.100/outlet?1=OFF"
        );
        assert_eq!(
            outlet_url("http://pdu.local/", "4", OutletState::On),
            "http://pdu.local/outlet?4=ON"
        );
    }

    #[test]
    fn test_basic_auth_header() {
        // RFC 7617 example credentials
        assert_eq!(basic_auth("Aladdin", "open sesame"), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_default_dwell() {
        let config = PduConfig::new("http://pdu", "1", "admin", "admin");
        assert_eq!(config.off_to_on_delay, DEFAULT_OFF_TO_ON_DELAY);
    }
}
