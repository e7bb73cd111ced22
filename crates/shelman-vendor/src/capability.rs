//! Hardware capability table keyed by vendor model code.
//!
//! The capability table decides which capability arrays a converter
//! populates and bounds the channel counts of a merged configuration:
//! templates can name any index, but the hardware determines how many
//! channels actually exist.

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use shelman_model::DeviceConfiguration;

/// Vendor API generation spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    /// Form-era HTTP API (`/settings`, `/status`).
    Gen1,
    /// RPC-era HTTP API (JSON-RPC on `/rpc`).
    Gen2,
}

impl Generation {
    /// Parse the generation number stored on a device row.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::UnsupportedGeneration`] for anything other
    /// than `1` or `2`.
    pub fn from_number(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Gen1),
            2 => Ok(Self::Gen2),
            other => Err(ConvertError::UnsupportedGeneration { value: other }),
        }
    }

    /// The generation number persisted on device rows.
    #[must_use]
    pub const fn as_number(self) -> i64 {
        match self {
            Self::Gen1 => 1,
            Self::Gen2 => 2,
        }
    }
}

/// Channel counts and optional capabilities of one hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Number of switch (relay) channels.
    pub switches: usize,
    /// Number of physical inputs.
    pub inputs: usize,
    /// Number of power meters.
    pub meters: usize,
    /// Whether the device can operate as a roller shutter.
    pub roller: bool,
    /// Whether the device is a dimmer.
    pub dimmer: bool,
    /// Whether the device has configurable status LEDs.
    pub led: bool,
    /// Whether the device has a wired Ethernet port.
    pub eth: bool,
}

impl DeviceCapabilities {
    const fn new(switches: usize, inputs: usize, meters: usize) -> Self {
        Self {
            switches,
            inputs,
            meters,
            roller: false,
            dimmer: false,
            led: false,
            eth: false,
        }
    }

    const fn with_led(mut self) -> Self {
        self.led = true;
        self
    }

    const fn with_roller(mut self) -> Self {
        self.roller = true;
        self
    }

    const fn with_dimmer(mut self) -> Self {
        self.dimmer = true;
        self
    }

    /// Look up the capabilities for a vendor model code.
    ///
    /// Unknown models fall back to a conservative single-relay profile for
    /// their generation so that newly released hardware still round-trips.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        match model {
            "SHPLG-S" | "SHPLG2-1" | "SNPL-00112EU" | "SNPL-00110IT" => {
                Self::new(1, 0, 1).with_led()
            }
            "SHSW-1" | "SNSW-001X16EU" => Self::new(1, 1, 0),
            "SHSW-PM" | "SNSW-001P16EU" => Self::new(1, 1, 1).with_led(),
            "SHSW-25" | "SNSW-102P16EU" => Self::new(2, 2, 2).with_roller(),
            "SHSW-L" => Self::new(1, 1, 1),
            "SHIX3-1" | "SNSN-0024X" => Self::new(0, 3, 0),
            "SHDM-1" | "SHDM-2" | "SNDM-0013US" => Self::new(0, 2, 1).with_dimmer(),
            _ => Self::new(1, 1, 0),
        }
    }

    /// Trim capability arrays of a merged configuration to the hardware's
    /// channel counts and drop sections the hardware lacks.
    pub fn clamp(&self, config: &mut DeviceConfiguration) {
        clamp_array(&mut config.switches, self.switches);
        clamp_array(&mut config.inputs, self.inputs);
        clamp_array(&mut config.meters, self.meters);
        if !self.roller {
            config.roller = None;
        }
        if !self.dimmer {
            config.dimmer = None;
        }
        if !self.led {
            config.led = None;
        }
    }
}

fn clamp_array<T>(slot: &mut Option<Vec<T>>, capacity: usize) {
    match slot {
        Some(items) if capacity == 0 => {
            items.clear();
            *slot = None;
        }
        Some(items) => items.truncate(capacity),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelman_model::SwitchConfig;

    #[test]
    fn known_models_resolve_expected_channel_counts() {
        let plug = DeviceCapabilities::for_model("SHPLG-S");
        assert_eq!((plug.switches, plug.inputs, plug.meters), (1, 0, 1));

        let pm = DeviceCapabilities::for_model("SHSW-PM");
        assert_eq!((pm.switches, pm.inputs, pm.meters), (1, 1, 1));

        let ix3 = DeviceCapabilities::for_model("SHIX3-1");
        assert_eq!((ix3.switches, ix3.inputs, ix3.meters), (0, 3, 0));
        assert!(!ix3.roller);

        assert!(DeviceCapabilities::for_model("SHSW-25").roller);
    }

    #[test]
    fn unknown_model_falls_back_to_single_relay() {
        let unknown = DeviceCapabilities::for_model("SH-FUTURE-9");
        assert_eq!((unknown.switches, unknown.inputs, unknown.meters), (1, 1, 0));
    }

    #[test]
    fn clamp_trims_template_overreach_to_hardware() {
        let mut config = DeviceConfiguration {
            switches: Some(vec![SwitchConfig::default(); 4]),
            ..DeviceConfiguration::default()
        };
        DeviceCapabilities::for_model("SHIX3-1").clamp(&mut config);
        assert_eq!(config.switches, None);

        let mut config = DeviceConfiguration {
            switches: Some(vec![SwitchConfig::default(); 4]),
            ..DeviceConfiguration::default()
        };
        DeviceCapabilities::for_model("SHSW-25").clamp(&mut config);
        assert_eq!(config.switches.map(|switches| switches.len()), Some(2));
    }
}
