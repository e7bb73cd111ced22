//! Layered configuration merge with per-field source tracking.
//!
//! The merge is pure and stateless: an ordered slice of named layers goes in,
//! one merged configuration and a `field path -> layer name` map come out.
//! Layers are applied lowest-priority first; any leaf a layer sets wins over
//! the accumulated value at the same path and is attributed to that layer.
//! There are no deletion semantics: clearing a value means setting its
//! explicit zero (empty string, `false`, `0`) in a higher layer.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::DeviceConfiguration;
use crate::error::{ModelError, Result};

/// Map of merged field paths (`mqtt.server`, `switches[0].name`) to the name
/// of the layer that last set them.
pub type SourceMap = BTreeMap<String, String>;

/// One input to the merge: a named partial configuration.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer name recorded in the source map, e.g. `template:office-defaults`
    /// or `device-override`.
    pub name: String,
    /// Partial configuration contributed by this layer.
    pub config: DeviceConfiguration,
}

impl ConfigLayer {
    /// Construct a named layer.
    pub fn new(name: impl Into<String>, config: DeviceConfiguration) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Result of a merge: the combined configuration plus source attribution.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The merged configuration.
    pub config: DeviceConfiguration,
    /// Which layer set each leaf.
    pub sources: SourceMap,
}

/// Merge `layers` in order, lowest priority first.
///
/// An empty slice yields an empty configuration and an empty source map.
/// Layers whose configuration is empty are no-ops. The operation is not
/// commutative: later layers win.
///
/// # Errors
///
/// Returns a [`ModelError`] when a layer fails to serialize or the merged
/// tree no longer matches the normalized model.
pub fn merge(layers: &[ConfigLayer]) -> Result<MergeOutcome> {
    let mut accumulator = Value::Object(Map::new());
    let mut sources = SourceMap::new();

    for layer in layers {
        let tree = layer.config.to_tree()?;
        merge_value(&mut accumulator, &tree, &layer.name, "", &mut sources);
    }

    let config = DeviceConfiguration::from_tree(accumulator)?;
    Ok(MergeOutcome { config, sources })
}

fn merge_value(
    accumulator: &mut Value,
    incoming: &Value,
    layer: &str,
    path: &str,
    sources: &mut SourceMap,
) {
    match incoming {
        // Null stands for an unset leaf and is skipped silently.
        Value::Null => {}
        Value::Object(fields) => {
            if !accumulator.is_object() {
                *accumulator = Value::Object(Map::new());
            }
            let Some(slot) = accumulator.as_object_mut() else {
                return;
            };
            for (key, value) in fields {
                let child_path = join_field(path, key);
                let child = slot.entry(key.clone()).or_insert(Value::Null);
                merge_value(child, value, layer, &child_path, sources);
            }
        }
        Value::Array(items) => {
            if !accumulator.is_array() {
                *accumulator = Value::Array(Vec::new());
            }
            let Some(slot) = accumulator.as_array_mut() else {
                return;
            };
            for (index, item) in items.iter().enumerate() {
                while slot.len() <= index {
                    // Indices below the highest one a layer names materialize
                    // as empty entries; the device's hardware determines the
                    // final channel count, not the templates.
                    slot.push(Value::Object(Map::new()));
                }
                let child_path = format!("{path}[{index}]");
                merge_value(&mut slot[index], item, layer, &child_path, sources);
            }
        }
        leaf => {
            *accumulator = leaf.clone();
            sources.insert(path.to_string(), layer.to_string());
        }
    }
}

fn join_field(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Deep-merge a partial document into a base document, returning the result.
///
/// This is the PATCH semantic used for per-device overrides: fields present
/// in `patch` replace the matching fields in `base`; everything else is kept.
///
/// # Errors
///
/// Returns a [`ModelError`] when either document fails to serialize or the
/// combined tree no longer matches the normalized model.
pub fn apply_patch(
    base: &DeviceConfiguration,
    patch: &DeviceConfiguration,
) -> Result<DeviceConfiguration> {
    let outcome = merge(&[
        ConfigLayer::new("base", base.clone()),
        ConfigLayer::new("patch", patch.clone()),
    ])?;
    Ok(outcome.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttConfig, SwitchConfig};

    fn mqtt_layer(name: &str, server: Option<&str>, user: Option<&str>) -> ConfigLayer {
        ConfigLayer::new(
            name,
            DeviceConfiguration {
                mqtt: Some(MqttConfig {
                    server: server.map(str::to_string),
                    user: user.map(str::to_string),
                    ..MqttConfig::default()
                }),
                ..DeviceConfiguration::default()
            },
        )
    }

    #[test]
    fn empty_layer_list_yields_empty_outcome() {
        let outcome = merge(&[]).expect("merge");
        assert!(outcome.config.is_empty());
        assert!(outcome.sources.is_empty());
    }

    #[test]
    fn later_layers_win_and_are_attributed() {
        let outcome = merge(&[
            mqtt_layer("global", Some("g"), None),
            mqtt_layer("device-type", Some("t"), None),
            mqtt_layer("device-override", None, Some("u")),
        ])
        .expect("merge");

        let mqtt = outcome.config.mqtt.expect("mqtt");
        assert_eq!(mqtt.server.as_deref(), Some("t"));
        assert_eq!(mqtt.user.as_deref(), Some("u"));
        assert_eq!(
            outcome.sources.get("mqtt.server").map(String::as_str),
            Some("device-type")
        );
        assert_eq!(
            outcome.sources.get("mqtt.user").map(String::as_str),
            Some("device-override")
        );
    }

    #[test]
    fn nested_override_does_not_clobber_siblings() {
        let base = ConfigLayer::new(
            "base",
            DeviceConfiguration {
                mqtt: Some(MqttConfig {
                    server: Some("broker.local:1883".to_string()),
                    keep_alive: Some(60),
                    ..MqttConfig::default()
                }),
                ..DeviceConfiguration::default()
            },
        );
        let top = mqtt_layer("top", Some("other.local:1883"), None);

        let outcome = merge(&[base, top]).expect("merge");
        let mqtt = outcome.config.mqtt.expect("mqtt");
        assert_eq!(mqtt.server.as_deref(), Some("other.local:1883"));
        assert_eq!(mqtt.keep_alive, Some(60));
        assert_eq!(
            outcome.sources.get("mqtt.keep_alive").map(String::as_str),
            Some("base")
        );
    }

    #[test]
    fn arrays_merge_per_field_by_index() {
        let base = ConfigLayer::new(
            "base",
            DeviceConfiguration {
                switches: Some(vec![SwitchConfig {
                    name: Some("heater".to_string()),
                    auto_off_seconds: Some(300.0),
                    ..SwitchConfig::default()
                }]),
                ..DeviceConfiguration::default()
            },
        );
        let top = ConfigLayer::new(
            "top",
            DeviceConfiguration {
                switches: Some(vec![SwitchConfig {
                    name: Some("boiler".to_string()),
                    ..SwitchConfig::default()
                }]),
                ..DeviceConfiguration::default()
            },
        );

        let outcome = merge(&[base, top]).expect("merge");
        let switches = outcome.config.switches.expect("switches");
        assert_eq!(switches[0].name.as_deref(), Some("boiler"));
        assert_eq!(switches[0].auto_off_seconds, Some(300.0));
        assert_eq!(
            outcome.sources.get("switches[0].name").map(String::as_str),
            Some("top")
        );
        assert_eq!(
            outcome
                .sources
                .get("switches[0].auto_off_seconds")
                .map(String::as_str),
            Some("base")
        );
    }

    #[test]
    fn sparse_higher_index_materializes_lower_entries() {
        let layer = ConfigLayer::new(
            "only",
            DeviceConfiguration {
                inputs: Some(vec![
                    crate::config::InputConfig::default(),
                    crate::config::InputConfig {
                        mode: Some("detached".to_string()),
                        ..crate::config::InputConfig::default()
                    },
                ]),
                ..DeviceConfiguration::default()
            },
        );

        let outcome = merge(&[layer]).expect("merge");
        let inputs = outcome.config.inputs.expect("inputs");
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0], crate::config::InputConfig::default());
        assert_eq!(inputs[1].mode.as_deref(), Some("detached"));
    }

    #[test]
    fn explicit_zero_overrides_earlier_value() {
        let outcome = merge(&[
            mqtt_layer("base", Some("broker.local:1883"), None),
            mqtt_layer("top", Some(""), None),
        ])
        .expect("merge");

        let mqtt = outcome.config.mqtt.expect("mqtt");
        assert_eq!(mqtt.server.as_deref(), Some(""));
        assert_eq!(
            outcome.sources.get("mqtt.server").map(String::as_str),
            Some("top")
        );
    }

    #[test]
    fn unset_fields_preserve_prefix_values_exactly() {
        let full = mqtt_layer("base", Some("s"), Some("u"));
        let prefix = merge(std::slice::from_ref(&full)).expect("prefix");
        let suffix = merge(&[full, mqtt_layer("noop", None, None)]).expect("suffix");
        assert_eq!(prefix.config, suffix.config);
    }

    #[test]
    fn patch_replaces_only_named_fields() {
        let base = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                server: Some("broker.local:1883".to_string()),
                user: Some("ops".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let patch = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                user: Some("svc".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        let merged = apply_patch(&base, &patch).expect("patch");
        let mqtt = merged.mqtt.clone().expect("mqtt");
        assert_eq!(mqtt.server.as_deref(), Some("broker.local:1883"));
        assert_eq!(mqtt.user.as_deref(), Some("svc"));

        // PATCH is idempotent: applying the same body twice is a no-op.
        let again = apply_patch(&merged, &patch).expect("patch again");
        assert_eq!(again, merged);
    }
}
