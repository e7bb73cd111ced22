//! Context-sensitive validation of normalized configuration documents.
//!
//! Validation is nil-tolerant: a template layer may legitimately leave a
//! dependent field unset because a lower layer supplies it, so most
//! cross-field checks only fire in [`ValidationMode::Complete`] (used for a
//! device's fully merged configuration). Range and enumeration checks apply
//! in either mode.

use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfiguration, WifiStationConfig};

/// How strict cross-field checks should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Validating one layer (template or override); dependent fields may be
    /// supplied by other layers.
    Layer,
    /// Validating a merged device configuration; dependent fields must be
    /// present.
    Complete,
}

/// One validation finding, addressed by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON Pointer to the offending field.
    pub pointer: String,
    /// Human-readable description of the failure.
    pub message: String,
}

impl ValidationIssue {
    fn new(pointer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

const INITIAL_STATES: [&str; 4] = ["on", "off", "last", "switch"];
const INPUT_MODES: [&str; 5] = ["momentary", "toggle", "edge", "detached", "action"];
const ROLLER_STATES: [&str; 3] = ["open", "close", "stop"];
const IPV4_METHODS: [&str; 2] = ["dhcp", "static"];

/// Validate a configuration document; an empty result means it is valid.
#[must_use]
pub fn validate(config: &DeviceConfiguration, mode: ValidationMode) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let complete = mode == ValidationMode::Complete;

    if let Some(mqtt) = &config.mqtt {
        let server_set = mqtt.server.as_deref().is_some_and(|s| !s.is_empty());
        if mqtt.enabled == Some(true) && complete && !server_set {
            issues.push(ValidationIssue::new(
                "/mqtt/server",
                "required when MQTT is enabled",
            ));
        }
        if let Some(server) = mqtt.server.as_deref() {
            if !server.is_empty() {
                validate_endpoint(server, "/mqtt/server", &mut issues);
            }
        }
        if let Some(qos) = mqtt.max_qos {
            if qos > 2 {
                issues.push(ValidationIssue::new("/mqtt/max_qos", "must be 0, 1, or 2"));
            }
        }
    }

    if let Some(auth) = &config.auth {
        if auth.enabled == Some(true) && complete {
            if auth.user.as_deref().is_none_or(str::is_empty) {
                issues.push(ValidationIssue::new(
                    "/auth/user",
                    "required when authentication is enabled",
                ));
            }
            let has_secret = auth.password.as_deref().is_some_and(|p| !p.is_empty())
                || auth.has_password == Some(true);
            if !has_secret {
                issues.push(ValidationIssue::new(
                    "/auth/password",
                    "required when authentication is enabled",
                ));
            }
        }
    }

    if let Some(network) = &config.network {
        if let Some(sta) = &network.wifi_sta {
            validate_station(sta, "/network/wifi_sta", complete, &mut issues);
        }
        if let Some(sta1) = &network.wifi_sta1 {
            validate_station(sta1, "/network/wifi_sta1", complete, &mut issues);
        }
        if let Some(eth) = &network.eth {
            if let Some(method) = eth.ipv4_method.as_deref() {
                if !IPV4_METHODS.contains(&method) {
                    issues.push(ValidationIssue::new(
                        "/network/eth/ipv4_method",
                        "must be 'dhcp' or 'static'",
                    ));
                }
            }
        }
    }

    if let Some(location) = &config.location {
        if let Some(lat) = location.lat {
            if !(-90.0..=90.0).contains(&lat) {
                issues.push(ValidationIssue::new(
                    "/location/lat",
                    "must be between -90 and 90",
                ));
            }
        }
        if let Some(lng) = location.lng {
            if !(-180.0..=180.0).contains(&lng) {
                issues.push(ValidationIssue::new(
                    "/location/lng",
                    "must be between -180 and 180",
                ));
            }
        }
    }

    if let Some(switches) = &config.switches {
        for (index, switch) in switches.iter().enumerate() {
            if let Some(state) = switch.initial_state.as_deref() {
                if !INITIAL_STATES.contains(&state) {
                    issues.push(ValidationIssue::new(
                        format!("/switches/{index}/initial_state"),
                        "must be one of 'on', 'off', 'last', 'switch'",
                    ));
                }
            }
        }
    }

    if let Some(inputs) = &config.inputs {
        for (index, input) in inputs.iter().enumerate() {
            if let Some(input_mode) = input.mode.as_deref() {
                if !INPUT_MODES.contains(&input_mode) {
                    issues.push(ValidationIssue::new(
                        format!("/inputs/{index}/mode"),
                        "must be one of 'momentary', 'toggle', 'edge', 'detached', 'action'",
                    ));
                }
            }
        }
    }

    if let Some(roller) = &config.roller {
        if let Some(state) = roller.default_state.as_deref() {
            if !ROLLER_STATES.contains(&state) {
                issues.push(ValidationIssue::new(
                    "/roller/default_state",
                    "must be one of 'open', 'close', 'stop'",
                ));
            }
        }
    }

    if let Some(dimmer) = &config.dimmer {
        if let (Some(min), Some(max)) = (dimmer.min_brightness, dimmer.max_brightness) {
            if min > max {
                issues.push(ValidationIssue::new(
                    "/dimmer/min_brightness",
                    "must not exceed max_brightness",
                ));
            }
        }
    }

    issues
}

fn validate_station(
    station: &WifiStationConfig,
    pointer: &str,
    complete: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    if station.enabled == Some(true)
        && complete
        && station.ssid.as_deref().is_none_or(str::is_empty)
    {
        issues.push(ValidationIssue::new(
            format!("{pointer}/ssid"),
            "required when the station is enabled",
        ));
    }
    if let Some(method) = station.ipv4_method.as_deref() {
        if !IPV4_METHODS.contains(&method) {
            issues.push(ValidationIssue::new(
                format!("{pointer}/ipv4_method"),
                "must be 'dhcp' or 'static'",
            ));
        }
        if method == "static" && complete {
            if station.ip.as_deref().is_none_or(str::is_empty) {
                issues.push(ValidationIssue::new(
                    format!("{pointer}/ip"),
                    "required for static addressing",
                ));
            }
            if station.netmask.as_deref().is_none_or(str::is_empty) {
                issues.push(ValidationIssue::new(
                    format!("{pointer}/netmask"),
                    "required for static addressing",
                ));
            }
        }
    }
}

fn validate_endpoint(endpoint: &str, pointer: &str, issues: &mut Vec<ValidationIssue>) {
    let (host, port) = endpoint
        .rsplit_once(':')
        .map_or((endpoint, None), |(host, port)| (host, Some(port)));
    if host.is_empty() {
        issues.push(ValidationIssue::new(pointer, "host must not be empty"));
        return;
    }
    if let Some(port) = port {
        if port.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
            issues.push(ValidationIssue::new(pointer, "port must be 1-65535"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, LocationConfig, MqttConfig, NetworkConfig};

    #[test]
    fn enabled_mqtt_without_server_is_legal_at_layer_level() {
        let config = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                enabled: Some(true),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert!(validate(&config, ValidationMode::Layer).is_empty());
        let issues = validate(&config, ValidationMode::Complete);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].pointer, "/mqtt/server");
    }

    #[test]
    fn malformed_endpoint_is_rejected_in_any_mode() {
        let config = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                server: Some(":1883".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert_eq!(validate(&config, ValidationMode::Layer).len(), 1);
    }

    #[test]
    fn auth_presence_flag_satisfies_the_password_requirement() {
        let config = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                user: Some("admin".to_string()),
                has_password: Some(true),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert!(validate(&config, ValidationMode::Complete).is_empty());
    }

    #[test]
    fn coordinates_out_of_range_are_rejected() {
        let config = DeviceConfiguration {
            location: Some(LocationConfig {
                lat: Some(120.0),
                lng: Some(-200.0),
                ..LocationConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert_eq!(validate(&config, ValidationMode::Layer).len(), 2);
    }

    #[test]
    fn static_addressing_requires_ip_and_netmask_when_complete() {
        let config = DeviceConfiguration {
            network: Some(NetworkConfig {
                wifi_sta: Some(WifiStationConfig {
                    enabled: Some(true),
                    ssid: Some("home".to_string()),
                    ipv4_method: Some("static".to_string()),
                    ..WifiStationConfig::default()
                }),
                ..NetworkConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert!(validate(&config, ValidationMode::Layer).is_empty());
        let issues = validate(&config, ValidationMode::Complete);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn unknown_enumeration_values_are_rejected() {
        let config = DeviceConfiguration {
            switches: Some(vec![crate::config::SwitchConfig {
                initial_state: Some("sideways".to_string()),
                ..crate::config::SwitchConfig::default()
            }]),
            inputs: Some(vec![crate::config::InputConfig {
                mode: Some("hold".to_string()),
                ..crate::config::InputConfig::default()
            }]),
            ..DeviceConfiguration::default()
        };

        assert_eq!(validate(&config, ValidationMode::Layer).len(), 2);
    }
}
