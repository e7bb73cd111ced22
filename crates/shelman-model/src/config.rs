//! The normalized configuration tree.
//!
//! # Design
//! - Pure data carriers shared by the merge engine, the vendor converters,
//!   and the configuration service.
//! - Absent leaves are elided on the wire (`skip_serializing_if`), so a
//!   partial document expresses exactly the fields it intends to set.
//! - Secret material (`password` fields) is write-only at the API surface;
//!   [`DeviceConfiguration::redact_secrets`] replaces values with sibling
//!   `has_password` indicators before a document leaves the service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;

/// Root of the normalized, generation-agnostic device configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfiguration {
    /// Device-wide system settings (name, eco mode, profile).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemConfig>,
    /// Network interfaces: WiFi station (primary/backup), access point, Ethernet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,
    /// Vendor cloud connectivity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudConfig>,
    /// MQTT client settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttConfig>,
    /// HTTP authentication on the device itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Timezone, coordinates, and NTP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationConfig>,
    /// CoIoT (Gen1 local push) settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coiot: Option<CoiotConfig>,
    /// Per-channel switch (relay) settings, index-addressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub switches: Option<Vec<SwitchConfig>>,
    /// Per-channel input settings, index-addressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<InputConfig>>,
    /// Per-channel meter settings, index-addressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meters: Option<Vec<MeterConfig>>,
    /// Roller-shutter settings for cover-capable devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roller: Option<RollerConfig>,
    /// Dimmer settings for dimming-capable devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimmer: Option<DimmerConfig>,
    /// Status-LED behaviour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led: Option<LedConfig>,
}

impl DeviceConfiguration {
    /// Whether no section of the configuration is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_tree()
            .map(|tree| tree.as_object().is_none_or(serde_json::Map::is_empty))
            .unwrap_or(false)
    }

    /// Serialize into a JSON tree with absent leaves elided.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Encode`] when serialization fails.
    pub fn to_tree(&self) -> Result<Value, ModelError> {
        serde_json::to_value(self).map_err(|source| ModelError::Encode { source })
    }

    /// Deserialize from a JSON tree produced by [`Self::to_tree`] or stored
    /// in the database.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Decode`] when the tree does not match the model.
    pub fn from_tree(tree: Value) -> Result<Self, ModelError> {
        serde_json::from_value(tree).map_err(|source| ModelError::Decode { source })
    }

    /// Strip secret material in place, leaving `has_password` indicators.
    ///
    /// Applied to every configuration document surfaced on a read path.
    pub fn redact_secrets(&mut self) {
        if let Some(network) = &mut self.network {
            if let Some(sta) = &mut network.wifi_sta {
                sta.redact();
            }
            if let Some(sta1) = &mut network.wifi_sta1 {
                sta1.redact();
            }
            if let Some(ap) = &mut network.wifi_ap {
                ap.redact();
            }
        }
        if let Some(mqtt) = &mut self.mqtt {
            if mqtt.password.is_some() {
                mqtt.has_password = Some(mqtt.password.as_deref() != Some(""));
                mqtt.password = None;
            }
        }
        if let Some(auth) = &mut self.auth {
            if auth.password.is_some() {
                auth.has_password = Some(auth.password.as_deref() != Some(""));
                auth.password = None;
            }
        }
    }
}

/// Device-wide system settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Human-readable device name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Energy-saving mode; trades responsiveness for lower idle draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eco_mode: Option<bool>,
    /// Whether the device advertises itself for discovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discoverable: Option<bool>,
    /// Gen2 device profile (`switch` or `cover`) on multi-profile hardware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_profile: Option<String>,
    /// Device-wide overpower threshold in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
    /// Whether the on-device debug log is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_enabled: Option<bool>,
}

/// Network interface settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Primary WiFi station.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_sta: Option<WifiStationConfig>,
    /// Backup WiFi station.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_sta1: Option<WifiStationConfig>,
    /// Built-in access point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_ap: Option<WifiApConfig>,
    /// Ethernet, on wired-capable hardware.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth: Option<EthConfig>,
}

/// WiFi station (client) settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiStationConfig {
    /// Whether the station is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Network SSID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Network passphrase. Write-only; never surfaced on reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Read-side indicator that a passphrase is stored on the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
    /// IPv4 addressing mode: `dhcp` or `static`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_method: Option<String>,
    /// Static IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Static netmask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    /// Static gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// Static DNS resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,
}

impl WifiStationConfig {
    fn redact(&mut self) {
        if self.password.is_some() {
            self.has_password = Some(self.password.as_deref() != Some(""));
            self.password = None;
        }
    }
}

/// Built-in access point settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiApConfig {
    /// Whether the access point is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Access point SSID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    /// Access point passphrase. Write-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Read-side indicator that a passphrase is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
}

impl WifiApConfig {
    fn redact(&mut self) {
        if self.password.is_some() {
            self.has_password = Some(self.password.as_deref() != Some(""));
            self.password = None;
        }
    }
}

/// Ethernet settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthConfig {
    /// Whether the wired interface is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// IPv4 addressing mode: `dhcp` or `static`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4_method: Option<String>,
    /// Static IPv4 address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Static netmask.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    /// Static gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

/// Vendor cloud connectivity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Whether the cloud uplink is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Cloud endpoint, `host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// MQTT client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Whether the MQTT client is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Broker endpoint, `host:port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Broker username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Broker password. Write-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Read-side indicator that a broker password is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
    /// MQTT client identifier; defaults to the device id when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<u32>,
    /// Whether sessions are clean.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean_session: Option<bool>,
    /// Maximum publish QoS, 0–2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_qos: Option<u32>,
    /// Whether publishes are retained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain: Option<bool>,
    /// Periodic status publish interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_period: Option<u32>,
}

/// On-device HTTP authentication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether authentication is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password. Write-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Read-side indicator that a password is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_password: Option<bool>,
}

/// Timezone, coordinates, and NTP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// IANA timezone name, e.g. `Europe/Berlin`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Latitude in decimal degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    /// Longitude in decimal degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    /// NTP server hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntp_server: Option<String>,
}

/// CoIoT (Gen1 local push protocol) settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoiotConfig {
    /// Whether CoIoT is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Status push interval in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_period: Option<u32>,
    /// Unicast peer, `host:port`; empty selects multicast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
}

/// Per-channel switch (relay) settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Channel name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Power-on state: `on`, `off`, `last`, or `switch` (follow input).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
    /// Auto-on timer in seconds; `0` disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_on_seconds: Option<f64>,
    /// Auto-off timer in seconds; `0` disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_off_seconds: Option<f64>,
    /// Per-channel overpower threshold in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
}

/// Per-channel input settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Input name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Input mode: `momentary`, `toggle`, `edge`, `detached`, or `action`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Whether the input signal is inverted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverted: Option<bool>,
}

/// Per-channel meter settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Per-meter overpower threshold in watts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_power: Option<f64>,
}

/// Roller-shutter settings for cover-capable devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollerConfig {
    /// Maximum opening travel time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_open: Option<f64>,
    /// Maximum closing travel time in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time_close: Option<f64>,
    /// Power-on state: `open`, `close`, or `stop`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_state: Option<String>,
    /// Whether open/close directions are swapped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<bool>,
    /// Obstacle detection mode: `disabled`, `while_opening`, `while_closing`,
    /// or `while_moving`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstacle_mode: Option<String>,
    /// Whether the safety-switch input is honoured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_switch: Option<bool>,
}

/// Dimmer settings for dimming-capable devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimmerConfig {
    /// Lowest selectable brightness percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_brightness: Option<u32>,
    /// Highest selectable brightness percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_brightness: Option<u32>,
    /// Fade rate, vendor-defined 1–5 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fade_rate: Option<u32>,
    /// Leading-edge (as opposed to trailing-edge) dimming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leading_edge: Option<bool>,
}

/// Status-LED behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// Disable the WiFi-status LED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_disabled: Option<bool>,
    /// Disable the output-state LED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_disabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_leaves_are_elided_from_serialization() {
        let config = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                server: Some("broker.local:1883".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        let tree = config.to_tree().expect("serialize");
        assert_eq!(
            tree,
            serde_json::json!({"mqtt": {"server": "broker.local:1883"}})
        );
    }

    #[test]
    fn explicit_zero_survives_round_trip() {
        let config = DeviceConfiguration {
            switches: Some(vec![SwitchConfig {
                auto_off_seconds: Some(0.0),
                ..SwitchConfig::default()
            }]),
            ..DeviceConfiguration::default()
        };

        let tree = config.to_tree().expect("serialize");
        assert_eq!(
            tree,
            serde_json::json!({"switches": [{"auto_off_seconds": 0.0}]})
        );
        let back = DeviceConfiguration::from_tree(tree).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn redaction_replaces_secrets_with_indicators() {
        let mut config = DeviceConfiguration {
            network: Some(NetworkConfig {
                wifi_sta: Some(WifiStationConfig {
                    ssid: Some("home".to_string()),
                    password: Some("hunter2".to_string()),
                    ..WifiStationConfig::default()
                }),
                ..NetworkConfig::default()
            }),
            mqtt: Some(MqttConfig {
                password: Some(String::new()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        config.redact_secrets();

        let sta = config
            .network
            .as_ref()
            .and_then(|network| network.wifi_sta.as_ref())
            .expect("wifi_sta");
        assert_eq!(sta.password, None);
        assert_eq!(sta.has_password, Some(true));
        // An explicitly cleared secret reads back as "no password stored".
        let mqtt = config.mqtt.as_ref().expect("mqtt");
        assert_eq!(mqtt.password, None);
        assert_eq!(mqtt.has_password, Some(false));
    }

    #[test]
    fn empty_configuration_reports_empty() {
        assert!(DeviceConfiguration::default().is_empty());
        let config = DeviceConfiguration {
            cloud: Some(CloudConfig {
                enabled: Some(false),
                server: None,
            }),
            ..DeviceConfiguration::default()
        };
        assert!(!config.is_empty());
    }
}
