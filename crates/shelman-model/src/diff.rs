//! Comparison between desired and observed configuration.
//!
//! The diff walks every leaf the desired configuration sets and checks the
//! device-reported (imported) configuration for it. Vendor read-only fields
//! never enter the normalized model, so the walk only has to special-case
//! secrets (compared by presence indicator), coordinates (tolerance), and
//! timezone names (normalized before equality). Each difference carries a
//! severity: `error` is an actionable mismatch, `warning` is a device-side
//! rewrite we accept.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DeviceConfiguration;
use crate::error::Result;

/// Tolerance applied when comparing latitude/longitude leaves.
const COORDINATE_TOLERANCE: f64 = 1e-4;

/// Severity of a single configuration difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSeverity {
    /// Actionable mismatch; the device does not hold the desired value.
    Error,
    /// Device-side rewrite we accept (case changes, trimmed whitespace).
    Warning,
}

/// One difference between desired and observed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDifference {
    /// Dot path of the differing leaf, e.g. `mqtt.server`.
    pub path: String,
    /// The desired value, when representable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// The observed value, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    /// Mismatch severity.
    pub severity: DiffSeverity,
    /// Short explanation for warnings and presence checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Compare a desired configuration against an imported snapshot.
///
/// Only leaves the desired configuration sets participate; everything it
/// leaves unset is inherited and may hold any value on the device.
///
/// # Errors
///
/// Returns a [`crate::ModelError`] when either document fails to serialize.
pub fn compare(
    desired: &DeviceConfiguration,
    imported: &DeviceConfiguration,
) -> Result<Vec<ConfigDifference>> {
    let desired_tree = desired.to_tree()?;
    let imported_tree = imported.to_tree()?;
    let mut differences = Vec::new();
    walk(&desired_tree, Some(&imported_tree), "", &mut differences);
    Ok(differences)
}

/// Whether a diff contains at least one `error`-severity difference.
#[must_use]
pub fn has_errors(differences: &[ConfigDifference]) -> bool {
    differences
        .iter()
        .any(|difference| difference.severity == DiffSeverity::Error)
}

fn walk(desired: &Value, imported: Option<&Value>, path: &str, out: &mut Vec<ConfigDifference>) {
    match desired {
        Value::Null => {}
        Value::Object(fields) => {
            let imported_fields = imported.and_then(Value::as_object);
            for (key, value) in fields {
                let child_path = join_field(path, key);
                match key.as_str() {
                    // Presence indicators are informational on both sides.
                    "has_password" => {}
                    "password" => {
                        check_secret(value, imported_fields, &child_path, out);
                    }
                    _ => {
                        let observed = imported_fields.and_then(|map| map.get(key));
                        walk(value, observed, &child_path, out);
                    }
                }
            }
        }
        Value::Array(items) => {
            let imported_items = imported.and_then(Value::as_array);
            for (index, item) in items.iter().enumerate() {
                let observed = imported_items.and_then(|list| list.get(index));
                walk(item, observed, &format!("{path}[{index}]"), out);
            }
        }
        leaf => check_leaf(leaf, imported, path, out),
    }
}

fn check_secret(
    desired: &Value,
    imported_fields: Option<&Map<String, Value>>,
    path: &str,
    out: &mut Vec<ConfigDifference>,
) {
    let Some(text) = desired.as_str() else {
        return;
    };
    let expect_present = !text.is_empty();
    // Some firmware never reports whether a secret is stored; without an
    // indicator the secret is unverifiable and the leaf is skipped.
    let Some(actual_present) = imported_fields
        .and_then(|map| map.get("has_password"))
        .and_then(Value::as_bool)
    else {
        return;
    };

    if expect_present != actual_present {
        out.push(ConfigDifference {
            path: path.to_string(),
            expected: None,
            actual: None,
            severity: DiffSeverity::Error,
            note: Some(if expect_present {
                "device reports no stored secret".to_string()
            } else {
                "device still holds a stored secret".to_string()
            }),
        });
    }
}

fn check_leaf(desired: &Value, imported: Option<&Value>, path: &str, out: &mut Vec<ConfigDifference>) {
    let Some(actual) = imported.filter(|value| !value.is_null()) else {
        // An explicit clear matches a device that simply omits the field.
        if !is_zero_value(desired) {
            out.push(ConfigDifference {
                path: path.to_string(),
                expected: Some(desired.clone()),
                actual: None,
                severity: DiffSeverity::Error,
                note: Some("not reported by device".to_string()),
            });
        }
        return;
    };

    if leaf_equal(desired, actual, path) {
        return;
    }

    if let (Some(want), Some(got)) = (desired.as_str(), actual.as_str()) {
        if want.trim().eq_ignore_ascii_case(got.trim()) {
            out.push(ConfigDifference {
                path: path.to_string(),
                expected: Some(desired.clone()),
                actual: Some(actual.clone()),
                severity: DiffSeverity::Warning,
                note: Some("device normalized the value".to_string()),
            });
            return;
        }
    }

    out.push(ConfigDifference {
        path: path.to_string(),
        expected: Some(desired.clone()),
        actual: Some(actual.clone()),
        severity: DiffSeverity::Error,
        note: None,
    });
}

fn leaf_equal(desired: &Value, actual: &Value, path: &str) -> bool {
    if path == "location.lat" || path == "location.lng" {
        if let (Some(want), Some(got)) = (desired.as_f64(), actual.as_f64()) {
            return (want - got).abs() <= COORDINATE_TOLERANCE;
        }
    }
    if path == "location.timezone" {
        if let (Some(want), Some(got)) = (desired.as_str(), actual.as_str()) {
            return normalize_timezone(want) == normalize_timezone(got);
        }
    }
    if let (Some(want), Some(got)) = (desired.as_f64(), actual.as_f64()) {
        return (want - got).abs() <= f64::EPSILON;
    }
    desired == actual
}

fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::String(text) => text.is_empty(),
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        _ => false,
    }
}

fn join_field(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Canonical form of a timezone name for equality purposes.
///
/// Devices report timezone names with inconsistent spacing and a handful of
/// legacy aliases; both sides run through this before comparison.
#[must_use]
pub fn normalize_timezone(name: &str) -> String {
    let trimmed = name.trim().replace(' ', "_");
    let lowered = trimmed.to_ascii_lowercase();
    match lowered.as_str() {
        "utc" | "etc/utc" | "universal" => "etc/utc".to_string(),
        "gmt" | "etc/gmt" => "etc/gmt".to_string(),
        _ => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, LocationConfig, MqttConfig, SystemConfig};

    fn desired_with_location(lat: f64, timezone: &str) -> DeviceConfiguration {
        DeviceConfiguration {
            location: Some(LocationConfig {
                timezone: Some(timezone.to_string()),
                lat: Some(lat),
                ..LocationConfig::default()
            }),
            ..DeviceConfiguration::default()
        }
    }

    #[test]
    fn identical_configurations_produce_no_differences() {
        let config = desired_with_location(52.52, "Europe/Berlin");
        let differences = compare(&config, &config).expect("compare");
        assert!(differences.is_empty());
    }

    #[test]
    fn coordinates_compare_with_tolerance() {
        let desired = desired_with_location(52.52, "Europe/Berlin");
        let close = desired_with_location(52.520_05, "Europe/Berlin");
        let far = desired_with_location(52.53, "Europe/Berlin");

        assert!(compare(&desired, &close).expect("compare").is_empty());
        let differences = compare(&desired, &far).expect("compare");
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].path, "location.lat");
        assert_eq!(differences[0].severity, DiffSeverity::Error);
    }

    #[test]
    fn timezone_aliases_are_equal() {
        let desired = desired_with_location(0.0, "UTC");
        let imported = desired_with_location(0.0, "Etc/UTC");
        assert!(compare(&desired, &imported).expect("compare").is_empty());
    }

    #[test]
    fn case_rewrite_is_a_warning_not_an_error() {
        let desired = DeviceConfiguration {
            system: Some(SystemConfig {
                name: Some("Kitchen-Plug".to_string()),
                ..SystemConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let imported = DeviceConfiguration {
            system: Some(SystemConfig {
                name: Some("kitchen-plug".to_string()),
                ..SystemConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        let differences = compare(&desired, &imported).expect("compare");
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].severity, DiffSeverity::Warning);
        assert!(!has_errors(&differences));
    }

    #[test]
    fn secrets_compare_by_presence_indicator() {
        let desired = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                user: Some("admin".to_string()),
                password: Some("hunter2".to_string()),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let with_secret = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                user: Some("admin".to_string()),
                has_password: Some(true),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let without_secret = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                user: Some("admin".to_string()),
                has_password: Some(false),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };

        assert!(compare(&desired, &with_secret).expect("compare").is_empty());
        let differences = compare(&desired, &without_secret).expect("compare");
        assert_eq!(differences.len(), 1);
        assert_eq!(differences[0].path, "auth.password");
        assert!(has_errors(&differences));
    }

    #[test]
    fn explicit_clear_matches_missing_device_field() {
        let desired = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                server: Some(String::new()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let imported = DeviceConfiguration::default();
        assert!(compare(&desired, &imported).expect("compare").is_empty());
    }

    #[test]
    fn missing_section_reports_each_set_leaf() {
        let desired = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                enabled: Some(true),
                server: Some("broker.local:1883".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        let differences = compare(&desired, &DeviceConfiguration::default()).expect("compare");
        assert_eq!(differences.len(), 2);
        assert!(has_errors(&differences));
    }
}
