//! Converter for the RPC-era (Gen2) component document.
//!
//! Gen2 devices report configuration as one component map (the
//! `Shelly.GetConfig` result) with per-channel components keyed
//! `switch:0`, `input:1`, and so on. The device client augments the
//! snapshot with an `auth` component derived from the device-info call,
//! since authentication state is not part of `GetConfig` proper. Writes
//! emit the same component map; the client turns each top-level component
//! into one `SetConfig` RPC.

use serde_json::{Map, Value};

use crate::capability::DeviceCapabilities;
use crate::error::Result;
use crate::value::{
    as_object, opt_bool, opt_f64, opt_object, opt_str, parse_document, put, put_object,
};
use shelman_model::{
    AuthConfig, CloudConfig, DeviceConfiguration, EthConfig, InputConfig, LocationConfig,
    MqttConfig, NetworkConfig, RollerConfig, SwitchConfig, SystemConfig, WifiApConfig,
    WifiStationConfig,
};

/// Parse a Gen2 component document into normalized form.
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
        system: read_sys_device(root)?,
        location: read_location(root)?,
        network: read_network(root)?,
        cloud: read_cloud(root)?,
        mqtt: read_mqtt(root)?,
        auth: read_auth(root)?,
        ..DeviceConfiguration::default()
    };

    read_channels(root, &capabilities, &mut config)?;
    Ok(config)
}

/// Render a normalized configuration as a Gen2 component document.
///
/// Sections Gen2 cannot express (CoIoT, LED policy, Gen1-only MQTT tuning)
/// are dropped.
///
/// # Errors
///
/// Returns a [`crate::ConvertError`] when serialization fails.
pub fn to_api(config: &DeviceConfiguration, model: &str) -> Result<Vec<u8>> {
    let capabilities = DeviceCapabilities::for_model(model);
    let mut root = Map::new();

    let mut sys = Map::new();
    if let Some(system) = &config.system {
        let mut device = Map::new();
        put(&mut device, "name", system.name.clone());
        put(&mut device, "eco_mode", system.eco_mode);
        put(&mut device, "discoverable", system.discoverable);
        put(&mut device, "profile", system.device_profile.clone());
        put_object(&mut sys, "device", device);
        if let Some(debug_enabled) = system.debug_enabled {
            let mut debug = Map::new();
            debug.insert("enable".to_string(), Value::from(debug_enabled));
            put_object(&mut sys, "debug", debug);
        }
    }
    if let Some(location) = &config.location {
        let mut fields = Map::new();
        put(&mut fields, "tz", location.timezone.clone());
        put(&mut fields, "lat", location.lat);
        put(&mut fields, "lon", location.lng);
        put_object(&mut sys, "location", fields);
        if let Some(server) = &location.ntp_server {
            let mut sntp = Map::new();
            sntp.insert("server".to_string(), Value::from(server.clone()));
            put_object(&mut sys, "sntp", sntp);
        }
    }
    put_object(&mut root, "sys", sys);

    if let Some(network) = &config.network {
        let mut wifi = Map::new();
        if let Some(sta) = &network.wifi_sta {
            put_object(&mut wifi, "sta", write_station(sta));
        }
        if let Some(sta1) = &network.wifi_sta1 {
            put_object(&mut wifi, "sta1", write_station(sta1));
        }
        if let Some(ap) = &network.wifi_ap {
            let mut fields = Map::new();
            put(&mut fields, "enable", ap.enabled);
            put(&mut fields, "ssid", ap.ssid.clone());
            put(&mut fields, "pass", ap.password.clone());
            put_object(&mut wifi, "ap", fields);
        }
        put_object(&mut root, "wifi", wifi);

        if let Some(eth) = &network.eth {
            let mut fields = Map::new();
            put(&mut fields, "enable", eth.enabled);
            put(&mut fields, "ipv4mode", eth.ipv4_method.clone());
            put(&mut fields, "ip", eth.ip.clone());
            put(&mut fields, "netmask", eth.netmask.clone());
            put(&mut fields, "gw", eth.gateway.clone());
            put_object(&mut root, "eth", fields);
        }
    }

    if let Some(cloud) = &config.cloud {
        let mut fields = Map::new();
        put(&mut fields, "enable", cloud.enabled);
        put(&mut fields, "server", cloud.server.clone());
        put_object(&mut root, "cloud", fields);
    }

    if let Some(mqtt) = &config.mqtt {
        let mut fields = Map::new();
        put(&mut fields, "enable", mqtt.enabled);
        put(&mut fields, "server", mqtt.server.clone());
        put(&mut fields, "user", mqtt.user.clone());
        put(&mut fields, "pass", mqtt.password.clone());
        put(&mut fields, "client_id", mqtt.client_id.clone());
        put_object(&mut root, "mqtt", fields);
    }

    if let Some(auth) = &config.auth {
        let mut fields = Map::new();
        put(&mut fields, "enable", auth.enabled);
        put(&mut fields, "user", auth.user.clone());
        put(&mut fields, "pass", auth.password.clone());
        put_object(&mut root, "auth", fields);
    }

    write_channels(config, &capabilities, &mut root);

    serde_json::to_vec(&Value::Object(root))
        .map_err(|source| crate::ConvertError::Encode { source })
}

fn read_sys_device(root: &Map<String, Value>) -> Result<Option<SystemConfig>> {
    let Some(sys) = opt_object(root, "sys", "")? else {
        return Ok(None);
    };
    let mut system = SystemConfig::default();
    if let Some(device) = opt_object(sys, "device", "sys")? {
        system.name = opt_str(device, "name", "sys.device")?;
        system.eco_mode = opt_bool(device, "eco_mode", "sys.device")?;
        system.discoverable = opt_bool(device, "discoverable", "sys.device")?;
        system.device_profile = opt_str(device, "profile", "sys.device")?;
    }
    if let Some(debug) = opt_object(sys, "debug", "sys")? {
        system.debug_enabled = opt_bool(debug, "enable", "sys.debug")?;
    }
    Ok(non_default(system))
}

fn read_location(root: &Map<String, Value>) -> Result<Option<LocationConfig>> {
    let Some(sys) = opt_object(root, "sys", "")? else {
        return Ok(None);
    };
    let mut location = LocationConfig::default();
    if let Some(fields) = opt_object(sys, "location", "sys")? {
        location.timezone = opt_str(fields, "tz", "sys.location")?;
        location.lat = opt_f64(fields, "lat", "sys.location")?;
        location.lng = opt_f64(fields, "lon", "sys.location")?;
    }
    if let Some(sntp) = opt_object(sys, "sntp", "sys")? {
        location.ntp_server = opt_str(sntp, "server", "sys.sntp")?;
    }
    Ok(non_default(location))
}

fn read_network(root: &Map<String, Value>) -> Result<Option<NetworkConfig>> {
    let mut network = NetworkConfig::default();
    if let Some(wifi) = opt_object(root, "wifi", "")? {
        network.wifi_sta = opt_object(wifi, "sta", "wifi")?
            .map(|fields| read_station(fields, "wifi.sta"))
            .transpose()?;
        network.wifi_sta1 = opt_object(wifi, "sta1", "wifi")?
            .map(|fields| read_station(fields, "wifi.sta1"))
            .transpose()?;
        network.wifi_ap = opt_object(wifi, "ap", "wifi")?
            .map(|fields| -> Result<WifiApConfig> {
                Ok(WifiApConfig {
                    enabled: opt_bool(fields, "enable", "wifi.ap")?,
                    ssid: opt_str(fields, "ssid", "wifi.ap")?,
                    password: None,
                    has_password: None,
                })
            })
            .transpose()?;
    }
    if let Some(eth) = opt_object(root, "eth", "")? {
        network.eth = non_default(EthConfig {
            enabled: opt_bool(eth, "enable", "eth")?,
            ipv4_method: opt_str(eth, "ipv4mode", "eth")?,
            ip: opt_str(eth, "ip", "eth")?,
            netmask: opt_str(eth, "netmask", "eth")?,
            gateway: opt_str(eth, "gw", "eth")?,
        });
    }
    Ok(non_default(network))
}

fn read_station(fields: &Map<String, Value>, path: &str) -> Result<WifiStationConfig> {
    Ok(WifiStationConfig {
        enabled: opt_bool(fields, "enable", path)?,
        ssid: opt_str(fields, "ssid", path)?,
        password: None,
        has_password: None,
        ipv4_method: opt_str(fields, "ipv4mode", path)?,
        ip: opt_str(fields, "ip", path)?,
        netmask: opt_str(fields, "netmask", path)?,
        gateway: opt_str(fields, "gw", path)?,
        dns: opt_str(fields, "nameserver", path)?,
    })
}

fn write_station(station: &WifiStationConfig) -> Map<String, Value> {
    let mut fields = Map::new();
    put(&mut fields, "enable", station.enabled);
    put(&mut fields, "ssid", station.ssid.clone());
    put(&mut fields, "pass", station.password.clone());
    put(&mut fields, "ipv4mode", station.ipv4_method.clone());
    put(&mut fields, "ip", station.ip.clone());
    put(&mut fields, "netmask", station.netmask.clone());
    put(&mut fields, "gw", station.gateway.clone());
    put(&mut fields, "nameserver", station.dns.clone());
    fields
}

fn read_cloud(root: &Map<String, Value>) -> Result<Option<CloudConfig>> {
    let Some(fields) = opt_object(root, "cloud", "")? else {
        return Ok(None);
    };
    Ok(non_default(CloudConfig {
        enabled: opt_bool(fields, "enable", "cloud")?,
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
        client_id: opt_str(fields, "client_id", "mqtt")?,
        keep_alive: None,
        clean_session: None,
        max_qos: None,
        retain: None,
        update_period: None,
    }))
}

fn read_auth(root: &Map<String, Value>) -> Result<Option<AuthConfig>> {
    let Some(fields) = opt_object(root, "auth", "")? else {
        return Ok(None);
    };
    let enabled = opt_bool(fields, "enable", "auth")?;
    Ok(non_default(AuthConfig {
        enabled,
        user: opt_str(fields, "user", "auth")?,
        password: None,
        has_password: enabled,
    }))
}

fn read_channels(
    root: &Map<String, Value>,
    capabilities: &DeviceCapabilities,
    config: &mut DeviceConfiguration,
) -> Result<()> {
    let mut switches = Vec::new();
    for index in 0..capabilities.switches {
        let key = format!("switch:{index}");
        let Some(fields) = opt_object(root, &key, "")? else {
            break;
        };
        switches.push(SwitchConfig {
            name: opt_str(fields, "name", &key)?,
            initial_state: opt_str(fields, "initial_state", &key)?
                .map(|state| initial_state_from_vendor(&state)),
            auto_on_seconds: read_auto_timer(fields, "auto_on", &key)?,
            auto_off_seconds: read_auto_timer(fields, "auto_off", &key)?,
            max_power: opt_f64(fields, "power_limit", &key)?,
        });
    }
    if !switches.is_empty() {
        config.switches = Some(switches);
    }

    let mut inputs = Vec::new();
    for index in 0..capabilities.inputs {
        let key = format!("input:{index}");
        let Some(fields) = opt_object(root, &key, "")? else {
            break;
        };
        inputs.push(InputConfig {
            name: opt_str(fields, "name", &key)?,
            mode: opt_str(fields, "type", &key)?.map(|kind| input_mode_from_vendor(&kind)),
            inverted: opt_bool(fields, "invert", &key)?,
        });
    }
    if !inputs.is_empty() {
        config.inputs = Some(inputs);
    }

    if capabilities.roller {
        if let Some(fields) = opt_object(root, "cover:0", "")? {
            config.roller = non_default(RollerConfig {
                max_time_open: opt_f64(fields, "maxtime_open", "cover:0")?,
                max_time_close: opt_f64(fields, "maxtime_close", "cover:0")?,
                default_state: opt_str(fields, "initial_state", "cover:0")?
                    .map(|state| roller_state_from_vendor(&state)),
                swap: opt_bool(fields, "invert_directions", "cover:0")?,
                obstacle_mode: opt_str(fields, "obstruction_detection", "cover:0")?,
                safety_switch: opt_bool(fields, "safety_switch", "cover:0")?,
            });
        }
    }

    Ok(())
}

fn write_channels(
    config: &DeviceConfiguration,
    capabilities: &DeviceCapabilities,
    root: &mut Map<String, Value>,
) {
    if let Some(switches) = &config.switches {
        for (index, switch) in switches.iter().enumerate().take(capabilities.switches) {
            let mut fields = Map::new();
            put(&mut fields, "name", switch.name.clone());
            put(
                &mut fields,
                "initial_state",
                switch
                    .initial_state
                    .as_deref()
                    .map(initial_state_to_vendor),
            );
            write_auto_timer(&mut fields, "auto_on", switch.auto_on_seconds);
            write_auto_timer(&mut fields, "auto_off", switch.auto_off_seconds);
            put(&mut fields, "power_limit", switch.max_power);
            put_object(root, &format!("switch:{index}"), fields);
        }
    }

    if let Some(inputs) = &config.inputs {
        for (index, input) in inputs.iter().enumerate().take(capabilities.inputs) {
            let mut fields = Map::new();
            put(&mut fields, "name", input.name.clone());
            put(
                &mut fields,
                "type",
                input.mode.as_deref().map(input_mode_to_vendor),
            );
            put(&mut fields, "invert", input.inverted);
            put_object(root, &format!("input:{index}"), fields);
        }
    }

    if capabilities.roller {
        if let Some(roller) = &config.roller {
            let mut fields = Map::new();
            put(&mut fields, "maxtime_open", roller.max_time_open);
            put(&mut fields, "maxtime_close", roller.max_time_close);
            put(
                &mut fields,
                "initial_state",
                roller.default_state.as_deref().map(roller_state_to_vendor),
            );
            put(&mut fields, "invert_directions", roller.swap);
            put(
                &mut fields,
                "obstruction_detection",
                roller.obstacle_mode.clone(),
            );
            put(&mut fields, "safety_switch", roller.safety_switch);
            put_object(root, "cover:0", fields);
        }
    }
}

fn read_auto_timer(fields: &Map<String, Value>, stem: &str, path: &str) -> Result<Option<f64>> {
    let Some(enabled) = opt_bool(fields, stem, path)? else {
        return Ok(None);
    };
    if !enabled {
        return Ok(Some(0.0));
    }
    Ok(Some(
        opt_f64(fields, &format!("{stem}_delay"), path)?.unwrap_or(0.0),
    ))
}

fn write_auto_timer(fields: &mut Map<String, Value>, stem: &str, seconds: Option<f64>) {
    let Some(seconds) = seconds else {
        return;
    };
    if seconds > 0.0 {
        fields.insert(stem.to_string(), Value::from(true));
        fields.insert(format!("{stem}_delay"), Value::from(seconds));
    } else {
        fields.insert(stem.to_string(), Value::from(false));
    }
}

fn initial_state_from_vendor(state: &str) -> String {
    match state {
        "restore_last" => "last".to_string(),
        "match_input" => "switch".to_string(),
        other => other.to_string(),
    }
}

fn initial_state_to_vendor(state: &str) -> String {
    match state {
        "last" => "restore_last".to_string(),
        "switch" => "match_input".to_string(),
        other => other.to_string(),
    }
}

fn input_mode_from_vendor(kind: &str) -> String {
    match kind {
        "button" => "momentary".to_string(),
        "switch" => "toggle".to_string(),
        other => other.to_string(),
    }
}

fn input_mode_to_vendor(mode: &str) -> String {
    match mode {
        "momentary" => "button".to_string(),
        "toggle" => "switch".to_string(),
        other => other.to_string(),
    }
}

fn roller_state_from_vendor(state: &str) -> String {
    match state {
        "closed" => "close".to_string(),
        "stopped" => "stop".to_string(),
        other => other.to_string(),
    }
}

fn roller_state_to_vendor(state: &str) -> String {
    match state {
        "close" => "closed".to_string(),
        "stop" => "stopped".to_string(),
        other => other.to_string(),
    }
}

fn non_default<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConvertError;

    const PLUS_1PM_CONFIG: &str = r#"{
        "ble": {"enable": false},
        "cloud": {"enable": true, "server": "shelly-103-eu.shelly.cloud:6022/jrpc"},
        "mqtt": {"enable": false, "server": null, "user": null, "client_id": "shellyplus1pm-441793d2"},
        "sys": {
            "device": {"name": "Hallway", "mac": "441793D2", "fw_id": "20231031-152439/1.0.7-g5db02bd", "eco_mode": false, "profile": "switch"},
            "location": {"tz": "Europe/Vienna", "lat": 48.2082, "lon": 16.3738},
            "sntp": {"server": "time.google.com"},
            "debug": {"enable": false}
        },
        "wifi": {
            "ap": {"enable": false, "ssid": "ShellyPlus1PM-441793D2"},
            "sta": {"enable": true, "ssid": "home-iot", "ipv4mode": "dhcp", "ip": null, "netmask": null, "gw": null, "nameserver": null},
            "sta1": {"enable": false, "ssid": null, "ipv4mode": "dhcp"}
        },
        "auth": {"enable": true, "user": "admin"},
        "switch:0": {"id": 0, "name": "Hall light", "initial_state": "restore_last", "auto_on": false, "auto_on_delay": 60.0, "auto_off": true, "auto_off_delay": 900.0, "power_limit": 2800, "in_mode": "follow"},
        "input:0": {"id": 0, "name": null, "type": "button", "invert": false}
    }"#;

    #[test]
    fn component_document_normalizes() {
        let config = from_api(PLUS_1PM_CONFIG.as_bytes(), "SNSW-001P16EU").expect("convert");

        let system = config.system.as_ref().expect("system");
        assert_eq!(system.name.as_deref(), Some("Hallway"));
        assert_eq!(system.device_profile.as_deref(), Some("switch"));

        let location = config.location.as_ref().expect("location");
        assert_eq!(location.timezone.as_deref(), Some("Europe/Vienna"));

        let auth = config.auth.as_ref().expect("auth");
        assert_eq!(auth.enabled, Some(true));
        assert_eq!(auth.has_password, Some(true));

        let switches = config.switches.as_ref().expect("switches");
        assert_eq!(switches[0].initial_state.as_deref(), Some("last"));
        // A disarmed timer normalizes to the explicit zero, an armed one to
        // its delay.
        assert_eq!(switches[0].auto_on_seconds, Some(0.0));
        assert_eq!(switches[0].auto_off_seconds, Some(900.0));

        let inputs = config.inputs.as_ref().expect("inputs");
        assert_eq!(inputs[0].mode.as_deref(), Some("momentary"));
    }

    #[test]
    fn malformed_component_reports_its_path() {
        let raw = r#"{"sys": {"device": {"name": 7}}}"#;
        let err = from_api(raw.as_bytes(), "SNSW-001X16EU").expect_err("must fail");
        match err {
            ConvertError::UnexpectedType { path, .. } => assert_eq!(path, "sys.device.name"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn round_trip_preserves_normalized_fields() {
        let config = DeviceConfiguration {
            system: Some(SystemConfig {
                name: Some("Hallway".to_string()),
                eco_mode: Some(true),
                device_profile: Some("switch".to_string()),
                ..SystemConfig::default()
            }),
            network: Some(NetworkConfig {
                wifi_sta: Some(WifiStationConfig {
                    enabled: Some(true),
                    ssid: Some("home-iot".to_string()),
                    ipv4_method: Some("static".to_string()),
                    ip: Some("192.168.1.40".to_string()),
                    netmask: Some("255.255.255.0".to_string()),
                    gateway: Some("192.168.1.1".to_string()),
                    ..WifiStationConfig::default()
                }),
                ..NetworkConfig::default()
            }),
            cloud: Some(CloudConfig {
                enabled: Some(false),
                server: None,
            }),
            switches: Some(vec![SwitchConfig {
                name: Some("Hall light".to_string()),
                initial_state: Some("switch".to_string()),
                auto_on_seconds: Some(0.0),
                auto_off_seconds: Some(900.0),
                max_power: Some(2800.0),
            }]),
            inputs: Some(vec![InputConfig {
                name: None,
                mode: Some("momentary".to_string()),
                inverted: Some(false),
            }]),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SNSW-001P16EU").expect("to_api");
        let back = from_api(&raw, "SNSW-001P16EU").expect("from_api");
        assert_eq!(back, config);
    }

    #[test]
    fn write_emits_component_map_with_secrets() {
        let config = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                user: Some("admin".to_string()),
                password: Some("hunter2".to_string()),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        let raw = to_api(&config, "SNSW-001X16EU").expect("to_api");
        let document: Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(
            document,
            serde_json::json!({
                "auth": {"enable": true, "user": "admin", "pass": "hunter2"}
            })
        );
    }
}
