//! Structural request validation limits.
//!
//! These checks are CPU-bound and run before any handler: content-type
//! allowlist, header count/size caps, forbidden headers, JSON depth and
//! array bounds, and prototype-pollution query keys.

use serde_json::Value;
use thiserror::Error;

/// Limits applied to every request.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum JSON nesting depth (a scalar counts as depth 1).
    pub max_json_depth: usize,
    /// Maximum number of elements in any single JSON array.
    pub max_json_array: usize,
    /// Maximum number of request headers.
    pub max_headers: usize,
    /// Maximum size of a single header value in bytes.
    pub max_header_bytes: usize,
    /// Content types accepted on bodies.
    pub allowed_content_types: Vec<String>,
    /// Headers rejected outright from untrusted sources.
    pub forbidden_headers: Vec<String>,
    /// Query keys rejected outright.
    pub forbidden_query_keys: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_json_depth: 10,
            max_json_array: 1000,
            max_headers: 100,
            max_header_bytes: 8 * 1024,
            allowed_content_types: vec![
                "application/json".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ],
            forbidden_headers: vec![
                "x-forwarded-host".to_string(),
                "x-forwarded-server".to_string(),
                "x-original-url".to_string(),
                "x-rewrite-url".to_string(),
            ],
            forbidden_query_keys: vec![
                "__proto__".to_string(),
                "constructor".to_string(),
                "prototype".to_string(),
            ],
        }
    }
}

/// One structural violation, mapped to `VALIDATION_FAILED` by the HTTP
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationViolation {
    /// JSON body nests deeper than allowed.
    #[error("JSON nesting depth {depth} exceeds the limit of {limit}")]
    TooDeep {
        /// Observed depth.
        depth: usize,
        /// Configured limit.
        limit: usize,
    },
    /// A JSON array is larger than allowed.
    #[error("JSON array of {len} elements exceeds the limit of {limit}")]
    ArrayTooLarge {
        /// Observed length.
        len: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The body carried an unsupported content type.
    #[error("unsupported content type '{got}'")]
    UnsupportedContentType {
        /// The declared content type.
        got: String,
    },
    /// Too many headers.
    #[error("{count} headers exceed the limit of {limit}")]
    TooManyHeaders {
        /// Observed count.
        count: usize,
        /// Configured limit.
        limit: usize,
    },
    /// One header value is too large.
    #[error("header '{name}' exceeds the size limit")]
    HeaderTooLarge {
        /// Header name.
        name: String,
    },
    /// A forbidden header was present.
    #[error("header '{name}' is not accepted")]
    ForbiddenHeader {
        /// Header name.
        name: String,
    },
    /// A forbidden query key was present.
    #[error("query key '{key}' is not accepted")]
    ForbiddenQueryKey {
        /// Query key.
        key: String,
    },
}

impl ValidationConfig {
    /// Check a declared content type against the allowlist; parameters
    /// (charset) are ignored.
    ///
    /// # Errors
    ///
    /// Returns the violation to surface to the client.
    pub fn check_content_type(&self, content_type: &str) -> Result<(), ValidationViolation> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if self
            .allowed_content_types
            .iter()
            .any(|allowed| allowed == &essence)
        {
            Ok(())
        } else {
            Err(ValidationViolation::UnsupportedContentType { got: essence })
        }
    }

    /// Check a parsed JSON document against depth and array limits.
    ///
    /// # Errors
    ///
    /// Returns the violation to surface to the client.
    pub fn check_json(&self, value: &Value) -> Result<(), ValidationViolation> {
        if let Some(len) = oversized_array(value, self.max_json_array) {
            return Err(ValidationViolation::ArrayTooLarge {
                len,
                limit: self.max_json_array,
            });
        }
        let depth = json_depth(value);
        if depth > self.max_json_depth {
            return Err(ValidationViolation::TooDeep {
                depth,
                limit: self.max_json_depth,
            });
        }
        Ok(())
    }

    /// Check a raw query string for forbidden keys.
    ///
    /// # Errors
    ///
    /// Returns the violation to surface to the client.
    pub fn check_query(&self, query: &str) -> Result<(), ValidationViolation> {
        for pair in query.split('&') {
            let key = pair.split('=').next().unwrap_or_default().trim();
            if self
                .forbidden_query_keys
                .iter()
                .any(|forbidden| forbidden.eq_ignore_ascii_case(key))
            {
                return Err(ValidationViolation::ForbiddenQueryKey {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Check header count, per-header size, and the forbidden list.
    ///
    /// # Errors
    ///
    /// Returns the violation to surface to the client.
    pub fn check_headers<'a>(
        &self,
        headers: impl Iterator<Item = (&'a str, usize)>,
    ) -> Result<(), ValidationViolation> {
        let mut count = 0;
        for (name, value_len) in headers {
            count += 1;
            if value_len > self.max_header_bytes {
                return Err(ValidationViolation::HeaderTooLarge {
                    name: name.to_string(),
                });
            }
            if self
                .forbidden_headers
                .iter()
                .any(|forbidden| forbidden.eq_ignore_ascii_case(name))
            {
                return Err(ValidationViolation::ForbiddenHeader {
                    name: name.to_string(),
                });
            }
        }
        if count > self.max_headers {
            return Err(ValidationViolation::TooManyHeaders {
                count,
                limit: self.max_headers,
            });
        }
        Ok(())
    }
}

/// Nesting depth of a JSON value; scalars count as 1.
#[must_use]
pub fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(fields) => 1 + fields.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 1,
    }
}

fn oversized_array(value: &Value, limit: usize) -> Option<usize> {
    match value {
        Value::Array(items) => {
            if items.len() > limit {
                return Some(items.len());
            }
            items.iter().find_map(|item| oversized_array(item, limit))
        }
        Value::Object(fields) => fields
            .values()
            .find_map(|field| oversized_array(field, limit)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize) -> Value {
        let mut value = json!(1);
        for _ in 1..depth {
            value = json!({"next": value});
        }
        value
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let config = ValidationConfig::default();
        assert_eq!(json_depth(&nested(10)), 10);
        assert!(config.check_json(&nested(10)).is_ok());
        assert!(matches!(
            config.check_json(&nested(11)),
            Err(ValidationViolation::TooDeep { depth: 11, .. })
        ));
    }

    #[test]
    fn array_limit_applies_at_any_level() {
        let config = ValidationConfig::default();
        let ok = json!({"items": vec![0; 1000]});
        let over = json!({"wrap": [{"items": vec![0; 1001]}]});
        assert!(config.check_json(&ok).is_ok());
        assert!(matches!(
            config.check_json(&over),
            Err(ValidationViolation::ArrayTooLarge { len: 1001, .. })
        ));
    }

    #[test]
    fn prototype_pollution_keys_are_rejected() {
        let config = ValidationConfig::default();
        assert!(config.check_query("page=1&page_size=20").is_ok());
        assert!(config.check_query("__proto__=x").is_err());
        assert!(config.check_query("a=1&CONSTRUCTOR=x").is_err());
    }

    #[test]
    fn content_type_allowlist_ignores_parameters() {
        let config = ValidationConfig::default();
        assert!(
            config
                .check_content_type("application/json; charset=utf-8")
                .is_ok()
        );
        assert!(config.check_content_type("text/xml").is_err());
    }

    #[test]
    fn forwarded_headers_are_rejected() {
        let config = ValidationConfig::default();
        let headers = [("content-type", 16), ("x-forwarded-host", 9)];
        assert!(matches!(
            config.check_headers(headers.iter().map(|(name, len)| (*name, *len))),
            Err(ValidationViolation::ForbiddenHeader { .. })
        ));
    }
}
