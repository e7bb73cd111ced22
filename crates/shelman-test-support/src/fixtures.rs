//! Canned device documents and configurations for tests.

use shelman_model::{DeviceConfiguration, LocationConfig, MqttConfig, SwitchConfig, SystemConfig};

/// A realistic Gen1 `/settings` document for a metering plug.
#[must_use]
pub fn gen1_plug_settings() -> Vec<u8> {
    serde_json::json!({
        "device": {"type": "SHPLG-S", "mac": "A4CF12F45B21", "num_outputs": 1, "num_meters": 1},
        "name": "Kitchen Plug",
        "eco_mode_enabled": false,
        "wifi_sta": {"enabled": true, "ssid": "home-iot", "ipv4_method": "dhcp"},
        "mqtt": {"enable": true, "server": "192.168.1.8:1883", "user": "iot",
                 "clean_session": true, "keep_alive": 60, "max_qos": 0,
                 "retain": false, "update_period": 30},
        "coiot": {"enabled": true, "update_period": 15, "peer": ""},
        "sntp": {"server": "time.google.com", "enabled": true},
        "login": {"enabled": false, "unprotected": false, "username": "admin"},
        "timezone": "Europe/Berlin",
        "lat": 52.52,
        "lng": 13.405,
        "relays": [{"name": null, "ison": false, "default_state": "off",
                    "auto_on": 0.0, "auto_off": 0.0, "max_power": 2500}]
    })
    .to_string()
    .into_bytes()
}

/// A realistic Gen2 component document for a Plus 1PM.
#[must_use]
pub fn gen2_switch_config() -> Vec<u8> {
    serde_json::json!({
        "sys": {
            "device": {"name": "Hallway", "eco_mode": false, "profile": "switch"},
            "location": {"tz": "Europe/Vienna", "lat": 48.2082, "lon": 16.3738},
            "sntp": {"server": "time.google.com"}
        },
        "wifi": {
            "ap": {"enable": false, "ssid": "ShellyPlus1PM-441793D2"},
            "sta": {"enable": true, "ssid": "home-iot", "ipv4mode": "dhcp"}
        },
        "cloud": {"enable": false},
        "mqtt": {"enable": false, "client_id": "shellyplus1pm-441793d2"},
        "auth": {"enable": false},
        "switch:0": {"id": 0, "initial_state": "restore_last",
                     "auto_on": false, "auto_off": false, "power_limit": 2800},
        "input:0": {"id": 0, "type": "switch", "invert": false}
    })
    .to_string()
    .into_bytes()
}

/// A small MQTT-only partial configuration, useful as a template layer.
#[must_use]
pub fn mqtt_layer(server: &str) -> DeviceConfiguration {
    DeviceConfiguration {
        mqtt: Some(MqttConfig {
            enabled: Some(true),
            server: Some(server.to_string()),
            ..MqttConfig::default()
        }),
        ..DeviceConfiguration::default()
    }
}

/// A location partial configuration, useful as a global template layer.
#[must_use]
pub fn location_layer(timezone: &str) -> DeviceConfiguration {
    DeviceConfiguration {
        location: Some(LocationConfig {
            timezone: Some(timezone.to_string()),
            ..LocationConfig::default()
        }),
        ..DeviceConfiguration::default()
    }
}

/// A single-switch partial configuration, useful as a device override.
#[must_use]
pub fn switch_override(name: &str) -> DeviceConfiguration {
    DeviceConfiguration {
        system: Some(SystemConfig {
            name: Some(name.to_string()),
            ..SystemConfig::default()
        }),
        switches: Some(vec![SwitchConfig {
            name: Some(name.to_string()),
            initial_state: Some("last".to_string()),
            ..SwitchConfig::default()
        }]),
        ..DeviceConfiguration::default()
    }
}
