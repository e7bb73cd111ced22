//! Converter for the form-era (Gen1) settings document.
//!
//! Gen1 devices expose one flat `/settings` document. Relay-backed devices
//! fold their input configuration into the relay entries (`btn_type`,
//! `btn_reverse`); only input-only hardware carries a separate `inputs`
//! array. Secrets are accepted on write (`key`, `pass`, `password`) and are
//! surfaced on read as presence indicators only.

use serde_json::{Map, Value};

use crate::capability::DeviceCapabilities;
use crate::error::Result;
use crate::value::{
    as_object, opt_array, opt_bool, opt_f64, opt_object, opt_str, opt_u32, parse_document, put,
    put_object,
};
use shelman_model::{
    AuthConfig, CloudConfig, CoiotConfig, DeviceConfiguration, DimmerConfig, InputConfig,
    LedConfig, LocationConfig, MqttConfig, NetworkConfig, RollerConfig, SwitchConfig,
    SystemConfig, WifiApConfig, WifiStationConfig,
};

/// Parse a Gen1 `/settings` document into normalized form.
///
/// # Errors
///
/// Returns a [`crate::ConvertError`] naming the offending path when the
/// document is malformed.
pub fn from_api(raw: &[u8], model: &str) -> Result<DeviceConfiguration> {
    let capabilities = DeviceCapabilities::for_model(model);
    let document = parse_document(raw)?;
    let root = as_object(&document, "")?;

    let mut config = DeviceConfiguration {
        system: non_default(SystemConfig {
            name: opt_str(root, "name", "")?,
            eco_mode: opt_bool(root, "eco_mode_enabled", "")?,
            discoverable: opt_bool(root, "discoverable", "")?,
            debug_enabled: opt_bool(root, "debug_enable", "")?,
            max_power: opt_f64(root, "max_power", "")?,
            device_profile: None,
        }),
        network: read_network(root)?,
        cloud: read_cloud(root)?,
        mqtt: read_mqtt(root)?,
        auth: read_login(root)?,
        location: read_location(root)?,
        coiot: read_coiot(root)?,
        led: non_default(LedConfig {
            status_disabled: opt_bool(root, "led_status_disable", "")?,
            power_disabled: opt_bool(root, "led_power_disable", "")?,
        }),
        ..DeviceConfiguration::default()
    };

    read_channels(root, &capabilities, &mut config)?;
    Ok(config)
}

/// Render a normalized configuration as a Gen1 settings document.
///
/// # Errors
///
/// Returns a [`crate::ConvertError`] when serialization fails.
pub fn to_api(config: &DeviceConfiguration, model: &str) -> Result<Vec<u8>> {
    let capabilities = DeviceCapabilities::for_model(model);
    let mut root = Map::new();

    if let Some(system) = &config.system {
        put(&mut root, "name", system.name.clone());
        put(&mut root, "eco_mode_enabled", system.eco_mode);
        put(&mut root, "discoverable", system.discoverable);
        put(&mut root, "debug_enable", system.debug_enabled);
        put(&mut root, "max_power", system.max_power);
    }
    if let Some(led) = &config.led {
        put(&mut root, "led_status_disable", led.status_disabled);
        put(&mut root, "led_power_disable", led.power_disabled);
    }
    if let Some(network) = &config.network {
        if let Some(sta) = &network.wifi_sta {
            put_object(&mut root, "wifi_sta", write_station(sta));
        }
        if let Some(sta1) = &network.wifi_sta1 {
            put_object(&mut root, "wifi_sta1", write_station(sta1));
        }
        if let Some(ap) = &network.wifi_ap {
            let mut fields = Map::new();
            put(&mut fields, "enabled", ap.enabled);
            put(&mut fields, "ssid", ap.ssid.clone());
            put(&mut fields, "key", ap.password.clone());
            put_object(&mut root, "ap", fields);
        }
    }
    if let Some(cloud) = &config.cloud {
        let mut fields = Map::new();
        put(&mut fields, "enabled", cloud.enabled);
        put(&mut fields, "server", cloud.server.clone());
        put_object(&mut root, "cloud", fields);
    }
    if let Some(mqtt) = &config.mqtt {
        let mut fields = Map::new();
        put(&mut fields, "enable", mqtt.enabled);
        put(&mut fields, "server", mqtt.server.clone());
        put(&mut fields, "user", mqtt.user.clone());
        put(&mut fields, "pass", mqtt.password.clone());
        put(&mut fields, "id", mqtt.client_id.clone());
        put(&mut fields, "keep_alive", mqtt.keep_alive);
        put(&mut fields, "clean_session", mqtt.clean_session);
        put(&mut fields, "max_qos", mqtt.max_qos);
        put(&mut fields, "retain", mqtt.retain);
        put(&mut fields, "update_period", mqtt.update_period);
        put_object(&mut root, "mqtt", fields);
    }
    if let Some(auth) = &config.auth {
        let mut fields = Map::new();
        put(&mut fields, "enabled", auth.enabled);
        put(&mut fields, "username", auth.user.clone());
        put(&mut fields, "password", auth.password.clone());
        put_object(&mut root, "login", fields);
    }
    if let Some(location) = &config.location {
        put(&mut root, "timezone", location.timezone.clone());
        put(&mut root, "lat", location.lat);
        put(&mut root, "lng", location.lng);
        if let Some(server) = &location.ntp_server {
            let mut fields = Map::new();
            fields.insert("server".to_string(), Value::from(server.clone()));
            put_object(&mut root, "sntp", fields);
        }
    }
    if let Some(coiot) = &config.coiot {
        let mut fields = Map::new();
        put(&mut fields, "enabled", coiot.enabled);
        put(&mut fields, "update_period", coiot.update_period);
        put(&mut fields, "peer", coiot.peer.clone());
        put_object(&mut root, "coiot", fields);
    }

    write_channels(config, &capabilities, &mut root);

    serde_json::to_vec(&Value::Object(root))
        .map_err(|source| crate::ConvertError::Encode { source })
}

fn read_network(root: &Map<String, Value>) -> Result<Option<NetworkConfig>> {
    let network = NetworkConfig {
        wifi_sta: opt_object(root, "wifi_sta", "")?
            .map(|fields| read_station(fields, "wifi_sta"))
            .transpose()?,
        wifi_sta1: opt_object(root, "wifi_sta1", "")?
            .map(|fields| read_station(fields, "wifi_sta1"))
            .transpose()?,
        wifi_ap: opt_object(root, "ap", "")?
            .map(|fields| -> Result<WifiApConfig> {
                Ok(WifiApConfig {
                    enabled: opt_bool(fields, "enabled", "ap")?,
                    ssid: opt_str(fields, "ssid", "ap")?,
                    password: None,
                    has_password: opt_str(fields, "key", "ap")?.map(|key| !key.is_empty()),
                })
            })
            .transpose()?,
        eth: None,
    };
    Ok(non_default(network))
}

fn read_station(fields: &Map<String, Value>, path: &str) -> Result<WifiStationConfig> {
    Ok(WifiStationConfig {
        enabled: opt_bool(fields, "enabled", path)?,
        ssid: opt_str(fields, "ssid", path)?,
        password: None,
        // Gen1 firmware reports the stored key in cleartext; only its
        // presence enters the normalized model.
        has_password: opt_str(fields, "key", path)?.map(|key| !key.is_empty()),
        ipv4_method: opt_str(fields, "ipv4_method", path)?,
        ip: opt_str(fields, "ip", path)?,
        netmask: opt_str(fields, "mask", path)?,
        gateway: opt_str(fields, "gw", path)?,
        dns: opt_str(fields, "dns", path)?,
    })
}

fn write_station(station: &WifiStationConfig) -> Map<String, Value> {
    let mut fields = Map::new();
    put(&mut fields, "enabled", station.enabled);
    put(&mut fields, "ssid", station.ssid.clone());
    put(&mut fields, "key", station.password.clone());
    put(&mut fields, "ipv4_method", station.ipv4_method.clone());
    put(&mut fields, "ip", station.ip.clone());
    put(&mut fields, "mask", station.netmask.clone());
    put(&mut fields, "gw", station.gateway.clone());
    put(&mut fields, "dns", station.dns.clone());
    fields
}

fn read_cloud(root: &Map<String, Value>) -> Result<Option<CloudConfig>> {
    let Some(fields) = opt_object(root, "cloud", "")? else {
        return Ok(None);
    };
    Ok(non_default(CloudConfig {
        enabled: opt_bool(fields, "enabled", "cloud")?,
        server: opt_str(fields, "server", "cloud")?,
    }))
}

fn read_mqtt(root: &Map<String, Value>) -> Result<Option<MqttConfig>> {
    let Some(fields) = opt_object(root, "mqtt", "")? else {
        return Ok(None);
    };
    Ok(non_default(MqttConfig {
        enabled: opt_bool(fields, "enable", "mqtt")?,
        server: opt_str(fields, "server", "mqtt")?,
        user: opt_str(fields, "user", "mqtt")?,
        password: None,
        has_password: None,
        client_id: opt_str(fields, "id", "mqtt")?,
        keep_alive: opt_u32(fields, "keep_alive", "mqtt")?,
        clean_session: opt_bool(fields, "clean_session", "mqtt")?,
        max_qos: opt_u32(fields, "max_qos", "mqtt")?,
        retain: opt_bool(fields, "retain", "mqtt")?,
        update_period: opt_u32(fields, "update_period", "mqtt")?,
    }))
}

fn read_login(root: &Map<String, Value>) -> Result<Option<AuthConfig>> {
    let Some(fields) = opt_object(root, "login", "")? else {
        return Ok(None);
    };
    let enabled = opt_bool(fields, "enabled", "login")?;
    Ok(non_default(AuthConfig {
        enabled,
        user: opt_str(fields, "username", "login")?,
        password: None,
        // Gen1 refuses to enable login without a password, so enablement
        // doubles as the presence indicator.
        has_password: enabled,
    }))
}

fn read_location(root: &Map<String, Value>) -> Result<Option<LocationConfig>> {
    let ntp_server = opt_object(root, "sntp", "")?
        .map(|fields| opt_str(fields, "server", "sntp"))
        .transpose()?
        .flatten();
    Ok(non_default(LocationConfig {
        timezone: opt_str(root, "timezone", "")?,
        lat: opt_f64(root, "lat", "")?,
        lng: opt_f64(root, "lng", "")?,
        ntp_server,
    }))
}

fn read_coiot(root: &Map<String, Value>) -> Result<Option<CoiotConfig>> {
    let Some(fields) = opt_object(root, "coiot", "")? else {
        return Ok(None);
    };
    Ok(non_default(CoiotConfig {
        enabled: opt_bool(fields, "enabled", "coiot")?,
        update_period: opt_u32(fields, "update_period", "coiot")?,
        peer: opt_str(fields, "peer", "coiot")?,
    }))
}

fn read_channels(
    root: &Map<String, Value>,
    capabilities: &DeviceCapabilities,
    config: &mut DeviceConfiguration,
) -> Result<()> {
    if let Some(relays) = opt_array(root, "relays", "")? {
        let mut switches = Vec::new();
        let mut inputs = Vec::new();
        for (index, relay) in relays.iter().enumerate().take(capabilities.switches) {
            let path = format!("relays[{index}]");
            let fields = as_object(relay, &path)?;
            switches.push(SwitchConfig {
                name: opt_str(fields, "name", &path)?,
                initial_state: opt_str(fields, "default_state", &path)?,
                auto_on_seconds: opt_f64(fields, "auto_on", &path)?,
                auto_off_seconds: opt_f64(fields, "auto_off", &path)?,
                max_power: opt_f64(fields, "max_power", &path)?,
            });
            if capabilities.inputs > index {
                inputs.push(InputConfig {
                    name: None,
                    mode: opt_str(fields, "btn_type", &path)?,
                    inverted: opt_u32(fields, "btn_reverse", &path)?.map(|raw| raw != 0),
                });
            }
        }
        if !switches.is_empty() {
            config.switches = Some(switches);
        }
        if !inputs.is_empty() && !root.contains_key("inputs") {
            config.inputs = Some(inputs);
        }
    }

    if let Some(raw_inputs) = opt_array(root, "inputs", "")? {
        let mut inputs = Vec::new();
        for (index, input) in raw_inputs.iter().enumerate().take(capabilities.inputs) {
            let path = format!("inputs[{index}]");
            let fields = as_object(input, &path)?;
            inputs.push(InputConfig {
                name: opt_str(fields, "name", &path)?,
                mode: opt_str(fields, "btn_type", &path)?,
                inverted: opt_u32(fields, "btn_reverse", &path)?.map(|raw| raw != 0),
            });
        }
        if !inputs.is_empty() {
            config.inputs = Some(inputs);
        }
    }

    if capabilities.roller {
        if let Some(rollers) = opt_array(root, "rollers", "")? {
            if let Some(first) = rollers.first() {
                let fields = as_object(first, "rollers[0]")?;
                config.roller = non_default(RollerConfig {
                    max_time_open: opt_f64(fields, "maxtime_open", "rollers[0]")?,
                    max_time_close: opt_f64(fields, "maxtime_close", "rollers[0]")?,
                    default_state: opt_str(fields, "default_state", "rollers[0]")?,
                    swap: opt_bool(fields, "swap", "rollers[0]")?,
                    obstacle_mode: opt_str(fields, "obstacle_mode", "rollers[0]")?,
                    safety_switch: opt_bool(fields, "safety_switch", "rollers[0]")?,
                });
            }
        }
    }

    if capabilities.dimmer {
        if let Some(dimmers) = opt_array(root, "dimmers", "")? {
            if let Some(first) = dimmers.first() {
                let fields = as_object(first, "dimmers[0]")?;
                config.dimmer = non_default(DimmerConfig {
                    min_brightness: opt_u32(fields, "min_brightness", "dimmers[0]")?,
                    max_brightness: opt_u32(fields, "max_brightness", "dimmers[0]")?,
                    fade_rate: opt_u32(fields, "fade_rate", "dimmers[0]")?,
                    leading_edge: opt_bool(fields, "leading_edge", "dimmers[0]")?,
                });
            }
        }
    }

    Ok(())
}

fn write_channels(
    config: &DeviceConfiguration,
    capabilities: &DeviceCapabilities,
    root: &mut Map<String, Value>,
) {
    let switches = config
        .switches
        .as_deref()
        .filter(|switches| !switches.is_empty() && capabilities.switches > 0);
    if let Some(switches) = switches {
        let switch_count = switches.len().min(capabilities.switches);
        let mut relays = Vec::with_capacity(switch_count);
        for (index, switch) in switches.iter().enumerate().take(switch_count) {
            let mut fields = Map::new();
            put(&mut fields, "name", switch.name.clone());
            put(&mut fields, "default_state", switch.initial_state.clone());
            put(&mut fields, "auto_on", switch.auto_on_seconds);
            put(&mut fields, "auto_off", switch.auto_off_seconds);
            put(&mut fields, "max_power", switch.max_power);
            // Relay-backed inputs ride along on the relay entry.
            if let Some(input) = config.inputs.as_ref().and_then(|inputs| inputs.get(index)) {
                put(&mut fields, "btn_type", input.mode.clone());
                put(
                    &mut fields,
                    "btn_reverse",
                    input.inverted.map(u32::from),
                );
            }
            relays.push(Value::Object(fields));
        }
        root.insert("relays".to_string(), Value::Array(relays));
    } else if let Some(inputs) = &config.inputs {
        let mut entries = Vec::new();
        for input in inputs.iter().take(capabilities.inputs) {
            let mut fields = Map::new();
            put(&mut fields, "name", input.name.clone());
            put(&mut fields, "btn_type", input.mode.clone());
            put(&mut fields, "btn_reverse", input.inverted.map(u32::from));
            entries.push(Value::Object(fields));
        }
        if !entries.is_empty() {
            root.insert("inputs".to_string(), Value::Array(entries));
        }
    }

    if capabilities.roller {
        if let Some(roller) = &config.roller {
            let mut fields = Map::new();
            put(&mut fields, "maxtime_open", roller.max_time_open);
            put(&mut fields, "maxtime_close", roller.max_time_close);
            put(&mut fields, "default_state", roller.default_state.clone());
            put(&mut fields, "swap", roller.swap);
            put(&mut fields, "obstacle_mode", roller.obstacle_mode.clone());
            put(&mut fields, "safety_switch", roller.safety_switch);
            if !fields.is_empty() {
                root.insert(
                    "rollers".to_string(),
                    Value::Array(vec![Value::Object(fields)]),
                );
            }
        }
    }

    if capabilities.dimmer {
        if let Some(dimmer) = &config.dimmer {
            let mut fields = Map::new();
            put(&mut fields, "min_brightness", dimmer.min_brightness);
            put(&mut fields, "max_brightness", dimmer.max_brightness);
            put(&mut fields, "fade_rate", dimmer.fade_rate);
            put(&mut fields, "leading_edge", dimmer.leading_edge);
            if !fields.is_empty() {
                root.insert(
                    "dimmers".to_string(),
                    Value::Array(vec![Value::Object(fields)]),
                );
            }
        }
    }
}

fn non_default<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConvertError;

    const PLUG_SETTINGS: &str = r#"{
        "device": {"type": "SHPLG-S", "mac": "A4CF12F45B21", "num_outputs": 1, "num_meters": 1},
        "name": "Kitchen Plug",
        "fw": "20230913-112003/v1.14.0",
        "eco_mode_enabled": true,
        "discoverable": true,
        "led_status_disable": false,
        "wifi_sta": {"enabled": true, "ssid": "home-iot", "key": "supersecret", "ipv4_method": "dhcp", "ip": null, "gw": null, "mask": null, "dns": null},
        "wifi_sta1": {"enabled": false, "ssid": null, "ipv4_method": "dhcp", "ip": null, "gw": null, "mask": null, "dns": null},
        "ap": {"enabled": false, "ssid": "shellyplug-s-F45B21", "key": ""},
        "mqtt": {"enable": true, "server": "192.168.1.8:1883", "user": "iot", "id": "shellyplug-s-F45B21", "clean_session": true, "keep_alive": 60, "max_qos": 0, "retain": false, "update_period": 30},
        "coiot": {"enabled": true, "update_period": 15, "peer": ""},
        "sntp": {"server": "time.google.com", "enabled": true},
        "login": {"enabled": false, "unprotected": false, "username": "admin"},
        "timezone": "Europe/Berlin",
        "lat": 52.52,
        "lng": 13.405,
        "cloud": {"enabled": false, "server": "shelly-55-eu.shelly.cloud:6022/jrpc"},
        "max_power": 2500,
        "relays": [{"name": null, "ison": false, "default_state": "off", "auto_on": 0.0, "auto_off": 0.0, "max_power": 2500}],
        "uptime": 123456
    }"#;

    #[test]
    fn plug_settings_document_normalizes() {
        let config = from_api(PLUG_SETTINGS.as_bytes(), "SHPLG-S").expect("convert");

        let system = config.system.as_ref().expect("system");
        assert_eq!(system.name.as_deref(), Some("Kitchen Plug"));
        assert_eq!(system.eco_mode, Some(true));

        let sta = config
            .network
            .as_ref()
            .and_then(|network| network.wifi_sta.as_ref())
            .expect("wifi_sta");
        assert_eq!(sta.ssid.as_deref(), Some("home-iot"));
        assert_eq!(sta.password, None);
        assert_eq!(sta.has_password, Some(true));

        let mqtt = config.mqtt.as_ref().expect("mqtt");
        assert_eq!(mqtt.enabled, Some(true));
        assert_eq!(mqtt.server.as_deref(), Some("192.168.1.8:1883"));
        assert_eq!(mqtt.keep_alive, Some(60));

        let location = config.location.as_ref().expect("location");
        assert_eq!(location.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(location.ntp_server.as_deref(), Some("time.google.com"));

        // Plugs have no inputs; nothing must be synthesized for them.
        assert_eq!(config.inputs, None);
        let switches = config.switches.as_ref().expect("switches");
        assert_eq!(switches.len(), 1);
        assert_eq!(switches[0].initial_state.as_deref(), Some("off"));
    }

    #[test]
    fn relay_entries_carry_input_settings_for_switch_hardware() {
        let raw = r#"{
            "relays": [{"default_state": "last", "btn_type": "toggle", "btn_reverse": 1}]
        }"#;
        let config = from_api(raw.as_bytes(), "SHSW-1").expect("convert");

        let inputs = config.inputs.as_ref().expect("inputs");
        assert_eq!(inputs[0].mode.as_deref(), Some("toggle"));
        assert_eq!(inputs[0].inverted, Some(true));
    }

    #[test]
    fn input_only_hardware_reads_the_inputs_array() {
        let raw = r#"{
            "inputs": [
                {"name": "left", "btn_type": "momentary", "btn_reverse": 0},
                {"name": "mid", "btn_type": "toggle", "btn_reverse": 0},
                {"name": "right", "btn_type": "detached", "btn_reverse": 1}
            ]
        }"#;
        let config = from_api(raw.as_bytes(), "SHIX3-1").expect("convert");

        assert_eq!(config.switches, None);
        let inputs = config.inputs.as_ref().expect("inputs");
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[2].name.as_deref(), Some("right"));
        assert_eq!(inputs[2].inverted, Some(true));
    }

    #[test]
    fn malformed_section_reports_its_path() {
        let raw = r#"{"mqtt": []}"#;
        let err = from_api(raw.as_bytes(), "SHPLG-S").expect_err("must fail");
        match err {
            ConvertError::UnexpectedType { path, .. } => assert_eq!(path, "mqtt"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn write_emits_only_set_fields_and_secrets() {
        let config = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                enabled: Some(true),
                server: Some("broker.local:1883".to_string()),
                password: Some("hunter2".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SHPLG-S").expect("convert");
        let document: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(
            document,
            serde_json::json!({
                "mqtt": {"enable": true, "server": "broker.local:1883", "pass": "hunter2"}
            })
        );
    }

    #[test]
    fn round_trip_preserves_normalized_fields() {
        let config = DeviceConfiguration {
            system: Some(SystemConfig {
                name: Some("Office Switch".to_string()),
                eco_mode: Some(false),
                ..SystemConfig::default()
            }),
            mqtt: Some(MqttConfig {
                enabled: Some(true),
                server: Some("broker.local:1883".to_string()),
                max_qos: Some(1),
                ..MqttConfig::default()
            }),
            location: Some(LocationConfig {
                timezone: Some("Europe/Berlin".to_string()),
                lat: Some(52.52),
                lng: Some(13.405),
                ntp_server: Some("pool.ntp.org".to_string()),
            }),
            switches: Some(vec![SwitchConfig {
                name: Some("heater".to_string()),
                initial_state: Some("last".to_string()),
                auto_off_seconds: Some(1800.0),
                ..SwitchConfig::default()
            }]),
            inputs: Some(vec![InputConfig {
                name: None,
                mode: Some("edge".to_string()),
                inverted: Some(false),
            }]),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SHSW-PM").expect("to_api");
        let back = from_api(&raw, "SHSW-PM").expect("from_api");
        assert_eq!(back, config);
    }

    #[test]
    fn roller_settings_round_trip_on_cover_hardware() {
        let config = DeviceConfiguration {
            roller: Some(RollerConfig {
                max_time_open: Some(25.0),
                max_time_close: Some(24.0),
                default_state: Some("stop".to_string()),
                swap: Some(false),
                obstacle_mode: Some("while_moving".to_string()),
                safety_switch: Some(true),
            }),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SHSW-25").expect("to_api");
        let back = from_api(&raw, "SHSW-25").expect("from_api");
        assert_eq!(back, config);

        // Hardware without a roller never emits the section.
        let raw = to_api(&config, "SHPLG-S").expect("to_api");
        let document: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(document.get("rollers"), None);
    }

    #[test]
    fn write_truncates_channels_beyond_hardware() {
        let config = DeviceConfiguration {
            switches: Some(vec![
                SwitchConfig {
                    name: Some("a".to_string()),
                    ..SwitchConfig::default()
                },
                SwitchConfig {
                    name: Some("b".to_string()),
                    ..SwitchConfig::default()
                },
            ]),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SHPLG-S").expect("to_api");
        let document: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(
            document
                .get("relays")
                .and_then(Value::as_array)
                .map(Vec::len),
            Some(1)
        );
    }
}
