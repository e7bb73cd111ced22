//! Per-generation HTTP transport with bounded timeouts.
//!
//! Gen1 devices speak form-style endpoints (`/settings`, `/status`,
//! `/relay/{i}`); Gen2 devices speak JSON-RPC on `/rpc`. Both adapters sit
//! behind one [`DeviceClient`] so callers dispatch on the stored generation
//! and never on wire details. Writes report per-section outcomes; partial
//! acceptance is an expected result, not an error.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DeviceError, Result};
use shelman_vendor::Generation;

/// Deadlines applied to device I/O.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// TCP connect budget.
    pub connect: Duration,
    /// Total budget for status/energy/settings reads.
    pub read: Duration,
    /// Total budget for configuration writes and reboots.
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            read: Duration::from_secs(5),
            write: Duration::from_secs(15),
        }
    }
}

/// Address and identity of one physical device.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    /// Catalogue id, used for logging and reachability bookkeeping.
    pub id: i64,
    /// Host (and optional port) the device listens on.
    pub host: String,
    /// Vendor API generation.
    pub generation: Generation,
    /// Vendor model code.
    pub model: String,
}

/// Switch actions accepted by the control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    /// Energize the relay.
    On,
    /// De-energize the relay.
    Off,
}

impl SwitchAction {
    const fn as_gen1(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    const fn as_bool(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Outcome of one configuration write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Per-section accept/reject results.
    pub sections: Vec<SectionWrite>,
    /// Whether the device reported that a restart is needed.
    pub restart_required: bool,
}

/// Accept/reject result for one written section.
#[derive(Debug, Clone)]
pub struct SectionWrite {
    /// Section label (`mqtt`, `wifi_sta`, `switch:0`, …).
    pub section: String,
    /// Whether the device accepted the section.
    pub success: bool,
    /// Failure detail when rejected.
    pub detail: Option<String>,
}

/// HTTP transport shared by every device operation.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    timeouts: Timeouts,
}

impl DeviceClient {
    /// Build a client with the default deadlines.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the underlying client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_timeouts(Timeouts::default())
    }

    /// Build a client with custom deadlines (tests use tight ones).
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the underlying client cannot be built.
    pub fn with_timeouts(timeouts: Timeouts) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|source| DeviceError::Transport {
                op: "client.build",
                source,
            })?;
        Ok(Self { http, timeouts })
    }

    /// Live device status.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] on timeout, transport failure, or an
    /// uninterpretable payload.
    pub async fn get_status(
        &self,
        target: &DeviceTarget,
        token: &CancellationToken,
    ) -> Result<Value> {
        match target.generation {
            Generation::Gen1 => {
                self.get_json(target, "/status", "status", token).await
            }
            Generation::Gen2 => {
                self.rpc(target, "Shelly.GetStatus", None, self.timeouts.read, "status", token)
                    .await
            }
        }
    }

    /// Live energy readings for the first meter.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] on timeout, transport failure, or an
    /// uninterpretable payload.
    pub async fn get_energy(
        &self,
        target: &DeviceTarget,
        token: &CancellationToken,
    ) -> Result<Value> {
        match target.generation {
            Generation::Gen1 => self.get_json(target, "/meter/0", "energy", token).await,
            Generation::Gen2 => {
                self.rpc(
                    target,
                    "Switch.GetStatus",
                    Some(json!({"id": 0})),
                    self.timeouts.read,
                    "energy",
                    token,
                )
                .await
            }
        }
    }

    /// Read the configuration snapshot document the converters consume.
    ///
    /// For Gen2 the snapshot is the component map augmented with an `auth`
    /// component derived from the device-info call.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] on timeout, transport failure, or an
    /// uninterpretable payload.
    pub async fn get_settings(
        &self,
        target: &DeviceTarget,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let document = match target.generation {
            Generation::Gen1 => self.get_json(target, "/settings", "settings", token).await?,
            Generation::Gen2 => {
                let mut config = self
                    .rpc(target, "Shelly.GetConfig", None, self.timeouts.read, "settings", token)
                    .await?;
                let info = self
                    .rpc(
                        target,
                        "Shelly.GetDeviceInfo",
                        None,
                        self.timeouts.read,
                        "settings",
                        token,
                    )
                    .await?;
                if let Some(fields) = config.as_object_mut() {
                    let auth_enabled = info
                        .get("auth_en")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    fields.insert("auth".to_string(), json!({"enable": auth_enabled}));
                }
                config
            }
        };
        serde_json::to_vec(&document).map_err(|err| DeviceError::Protocol {
            op: "settings",
            detail: err.to_string(),
        })
    }

    /// Write a vendor configuration document, section by section.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] when the document is malformed or when the
    /// device is unreachable for every section; individual section
    /// rejections are reported in the outcome instead.
    pub async fn put_settings(
        &self,
        target: &DeviceTarget,
        raw: &[u8],
        token: &CancellationToken,
    ) -> Result<WriteOutcome> {
        let document: Value =
            serde_json::from_slice(raw).map_err(|err| DeviceError::Protocol {
                op: "put_settings",
                detail: err.to_string(),
            })?;
        let Some(fields) = document.as_object() else {
            return Err(DeviceError::Protocol {
                op: "put_settings",
                detail: "document root must be an object".to_string(),
            });
        };

        match target.generation {
            Generation::Gen1 => self.put_settings_gen1(target, fields, token).await,
            Generation::Gen2 => self.put_settings_gen2(target, fields, token).await,
        }
    }

    /// Drive a relay channel.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] on timeout or transport failure.
    pub async fn set_switch(
        &self,
        target: &DeviceTarget,
        channel: usize,
        action: SwitchAction,
        token: &CancellationToken,
    ) -> Result<()> {
        match target.generation {
            Generation::Gen1 => {
                let path = format!("/relay/{channel}?turn={}", action.as_gen1());
                self.get_json(target, &path, "control", token).await?;
            }
            Generation::Gen2 => {
                self.rpc(
                    target,
                    "Switch.Set",
                    Some(json!({"id": channel, "on": action.as_bool()})),
                    self.timeouts.read,
                    "control",
                    token,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Reboot the device.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] on timeout or transport failure.
    pub async fn reboot(&self, target: &DeviceTarget, token: &CancellationToken) -> Result<()> {
        match target.generation {
            Generation::Gen1 => {
                self.request_ok(target, "/reboot", self.timeouts.write, "reboot", token)
                    .await
            }
            Generation::Gen2 => {
                self.rpc(target, "Shelly.Reboot", None, self.timeouts.write, "reboot", token)
                    .await
                    .map(|_| ())
            }
        }
    }

    async fn get_json(
        &self,
        target: &DeviceTarget,
        path: &str,
        op: &'static str,
        token: &CancellationToken,
    ) -> Result<Value> {
        let url = format!("http://{}{path}", target.host);
        let request = self.http.get(&url);
        run_bounded(token, op, self.timeouts.read, async move {
            let response = request.send().await.map_err(|err| transport(op, err))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeviceError::Status {
                    op,
                    status: status.as_u16(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|err| DeviceError::Protocol {
                    op,
                    detail: err.to_string(),
                })
        })
        .await
    }

    async fn request_ok(
        &self,
        target: &DeviceTarget,
        path: &str,
        deadline: Duration,
        op: &'static str,
        token: &CancellationToken,
    ) -> Result<()> {
        let url = format!("http://{}{path}", target.host);
        let request = self.http.get(&url);
        run_bounded(token, op, deadline, async move {
            let response = request.send().await.map_err(|err| transport(op, err))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeviceError::Status {
                    op,
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn rpc(
        &self,
        target: &DeviceTarget,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
        op: &'static str,
        token: &CancellationToken,
    ) -> Result<Value> {
        let url = format!("http://{}/rpc", target.host);
        let mut body = json!({"id": 1, "method": method});
        if let Some(params) = params {
            body["params"] = params;
        }
        let request = self.http.post(&url).json(&body);
        let method_owned = method.to_string();
        run_bounded(token, op, deadline, async move {
            let response = request.send().await.map_err(|err| transport(op, err))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeviceError::Status {
                    op,
                    status: status.as_u16(),
                });
            }
            let payload: Value =
                response
                    .json()
                    .await
                    .map_err(|err| DeviceError::Protocol {
                        op,
                        detail: err.to_string(),
                    })?;
            if let Some(error) = payload.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified device error")
                    .to_string();
                return Err(DeviceError::Rpc {
                    method: method_owned,
                    message,
                });
            }
            Ok(payload.get("result").cloned().unwrap_or(Value::Null))
        })
        .await
    }

    async fn put_settings_gen1(
        &self,
        target: &DeviceTarget,
        fields: &Map<String, Value>,
        token: &CancellationToken,
    ) -> Result<WriteOutcome> {
        let plan = gen1_write_plan(fields);
        let mut sections = Vec::with_capacity(plan.len());
        let mut first_failure: Option<DeviceError> = None;

        for step in plan {
            let url = format!("http://{}{}", target.host, step.path);
            let request = self.http.post(&url).form(&step.params);
            let result = run_bounded(token, "put_settings", self.timeouts.write, async move {
                let response = request
                    .send()
                    .await
                    .map_err(|err| transport("put_settings", err))?;
                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else {
                    Err(DeviceError::Status {
                        op: "put_settings",
                        status: status.as_u16(),
                    })
                }
            })
            .await;

            match result {
                Ok(()) => sections.push(SectionWrite {
                    section: step.section,
                    success: true,
                    detail: None,
                }),
                Err(err) => {
                    debug!(section = %step.section, error = %err, "gen1 section write rejected");
                    sections.push(SectionWrite {
                        section: step.section,
                        success: false,
                        detail: Some(err.to_string()),
                    });
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        finish_write(sections, first_failure, false)
    }

    async fn put_settings_gen2(
        &self,
        target: &DeviceTarget,
        fields: &Map<String, Value>,
        token: &CancellationToken,
    ) -> Result<WriteOutcome> {
        let mut sections = Vec::with_capacity(fields.len());
        let mut first_failure: Option<DeviceError> = None;
        let mut restart_required = false;

        for (component, config) in fields {
            let Some(call) = gen2_rpc_call(component, config) else {
                continue;
            };
            let result = self
                .rpc(
                    target,
                    &call.method,
                    Some(call.params),
                    self.timeouts.write,
                    "put_settings",
                    token,
                )
                .await;

            match result {
                Ok(payload) => {
                    restart_required |= payload
                        .get("restart_required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    sections.push(SectionWrite {
                        section: component.clone(),
                        success: true,
                        detail: None,
                    });
                }
                Err(err) => {
                    debug!(section = %component, error = %err, "gen2 component write rejected");
                    sections.push(SectionWrite {
                        section: component.clone(),
                        success: false,
                        detail: Some(err.to_string()),
                    });
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        finish_write(sections, first_failure, restart_required)
    }
}

struct Gen1WriteStep {
    section: String,
    path: String,
    params: Vec<(String, String)>,
}

/// Break a Gen1 settings document into per-endpoint form posts.
fn gen1_write_plan(fields: &Map<String, Value>) -> Vec<Gen1WriteStep> {
    let mut plan = Vec::new();
    let mut root_params = Vec::new();

    for (key, value) in fields {
        match (key.as_str(), value) {
            ("wifi_sta", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings/sta".to_string(),
                params: flatten_params(section, None),
            }),
            ("wifi_sta1", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings/sta1".to_string(),
                params: flatten_params(section, None),
            }),
            ("ap", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings/ap".to_string(),
                params: flatten_params(section, None),
            }),
            ("login", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings/login".to_string(),
                params: flatten_params(section, None),
            }),
            ("cloud", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings/cloud".to_string(),
                params: flatten_params(section, None),
            }),
            // MQTT, CoIoT, and SNTP settings ride on the root endpoint with
            // prefixed parameter names.
            ("mqtt" | "coiot" | "sntp", Value::Object(section)) => plan.push(Gen1WriteStep {
                section: key.clone(),
                path: "/settings".to_string(),
                params: flatten_params(section, Some(key)),
            }),
            ("relays", Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    if let Value::Object(section) = item {
                        plan.push(Gen1WriteStep {
                            section: format!("relays[{index}]"),
                            path: format!("/settings/relay/{index}"),
                            params: flatten_params(section, None),
                        });
                    }
                }
            }
            ("rollers", Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    if let Value::Object(section) = item {
                        plan.push(Gen1WriteStep {
                            section: format!("rollers[{index}]"),
                            path: format!("/settings/roller/{index}"),
                            params: flatten_params(section, None),
                        });
                    }
                }
            }
            ("dimmers", Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    if let Value::Object(section) = item {
                        plan.push(Gen1WriteStep {
                            section: format!("dimmers[{index}]"),
                            path: format!("/settings/light/{index}"),
                            params: flatten_params(section, None),
                        });
                    }
                }
            }
            (_, Value::Object(_) | Value::Array(_) | Value::Null) => {}
            (_, scalar) => root_params.push((key.clone(), scalar_to_param(scalar))),
        }
    }

    if !root_params.is_empty() {
        plan.insert(
            0,
            Gen1WriteStep {
                section: "settings".to_string(),
                path: "/settings".to_string(),
                params: root_params,
            },
        );
    }

    plan
}

fn flatten_params(section: &Map<String, Value>, prefix: Option<&str>) -> Vec<(String, String)> {
    section
        .iter()
        .filter(|(_, value)| !matches!(value, Value::Null | Value::Object(_) | Value::Array(_)))
        .map(|(key, value)| {
            let name = prefix.map_or_else(|| key.clone(), |prefix| format!("{prefix}_{key}"));
            (name, scalar_to_param(value))
        })
        .collect()
}

fn scalar_to_param(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

struct Gen2RpcCall {
    method: String,
    params: Value,
}

/// Map one component of a Gen2 document to its `SetConfig` RPC.
fn gen2_rpc_call(component: &str, config: &Value) -> Option<Gen2RpcCall> {
    if component == "auth" {
        let fields = config.as_object()?;
        return Some(Gen2RpcCall {
            method: "Shelly.SetAuth".to_string(),
            params: json!({
                "user": fields.get("user").cloned().unwrap_or(Value::Null),
                "pass": fields.get("pass").cloned().unwrap_or(Value::Null),
                "enable": fields.get("enable").cloned().unwrap_or(Value::Null),
            }),
        });
    }

    let (kind, channel) = component
        .split_once(':')
        .map_or((component, None), |(kind, index)| {
            (kind, index.parse::<u32>().ok())
        });
    let service = match kind {
        "sys" => "Sys",
        "wifi" => "WiFi",
        "eth" => "Eth",
        "cloud" => "Cloud",
        "mqtt" => "MQTT",
        "switch" => "Switch",
        "input" => "Input",
        "cover" => "Cover",
        "light" => "Light",
        _ => return None,
    };

    let params = channel.map_or_else(
        || json!({"config": config}),
        |id| json!({"id": id, "config": config}),
    );
    Some(Gen2RpcCall {
        method: format!("{service}.SetConfig"),
        params,
    })
}

fn finish_write(
    sections: Vec<SectionWrite>,
    first_failure: Option<DeviceError>,
    restart_required: bool,
) -> Result<WriteOutcome> {
    // A device that rejected every single section with a transport-level
    // failure was never really written to; surface that as an error so the
    // reachability cache learns about it.
    if let Some(err) = first_failure {
        if !sections.is_empty() && sections.iter().all(|section| !section.success) {
            return Err(err);
        }
    }
    Ok(WriteOutcome {
        sections,
        restart_required,
    })
}

fn transport(op: &'static str, err: reqwest::Error) -> DeviceError {
    if err.is_timeout() {
        DeviceError::Timeout { op }
    } else {
        DeviceError::Transport { op, source: err }
    }
}

async fn run_bounded<T>(
    token: &CancellationToken,
    op: &'static str,
    deadline: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = token.cancelled() => Err(DeviceError::Cancelled { op }),
        outcome = tokio::time::timeout(deadline, future) => match outcome {
            Ok(result) => result,
            Err(_) => Err(DeviceError::Timeout { op }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn target(server: &MockServer, generation: Generation, model: &str) -> DeviceTarget {
        DeviceTarget {
            id: 1,
            host: server.address().to_string(),
            generation,
            model: model.to_string(),
        }
    }

    fn tight_timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(500),
            write: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn gen1_status_uses_the_status_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/status");
                then.status(200)
                    .json_body(serde_json::json!({"relays": [{"ison": true}]}));
            })
            .await;

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let status = client
            .get_status(&target(&server, Generation::Gen1, "SHPLG-S"), &token)
            .await
            .expect("status");

        mock.assert_async().await;
        assert_eq!(status["relays"][0]["ison"], true);
    }

    #[tokio::test]
    async fn gen2_rpc_error_surfaces_as_rpc_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rpc");
                then.status(200).json_body(serde_json::json!({
                    "id": 1,
                    "error": {"code": -103, "message": "Invalid argument"}
                }));
            })
            .await;

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let err = client
            .get_status(&target(&server, Generation::Gen2, "SNSW-001X16EU"), &token)
            .await
            .expect_err("must fail");
        assert!(matches!(err, DeviceError::Rpc { .. }));
    }

    #[test]
    fn gen1_write_plan_splits_sections_onto_their_endpoints() {
        let document = serde_json::json!({
            "name": "Kitchen",
            "mqtt": {"enable": true, "server": "broker.local:1883"},
            "wifi_sta": {"enabled": true, "ssid": "home", "key": "secret"},
            "relays": [{"default_state": "off"}]
        });
        let plan = gen1_write_plan(document.as_object().expect("object"));

        // Root scalars lead; object sections follow in document key order.
        let paths: Vec<_> = plan.iter().map(|step| step.path.as_str()).collect();
        assert_eq!(
            paths,
            ["/settings", "/settings", "/settings/relay/0", "/settings/sta"]
        );
        let mqtt = plan
            .iter()
            .find(|step| step.section == "mqtt")
            .expect("mqtt step");
        assert!(
            mqtt.params
                .contains(&("mqtt_server".to_string(), "broker.local:1883".to_string()))
        );
    }

    #[tokio::test]
    async fn gen1_put_settings_reports_partial_acceptance() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/settings");
                then.status(200).json_body(serde_json::json!({}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/settings/relay/0");
                then.status(400).body("invalid default_state");
            })
            .await;

        let document = serde_json::json!({
            "name": "Kitchen",
            "relays": [{"default_state": "sideways"}]
        });
        let raw = serde_json::to_vec(&document).expect("encode");

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let outcome = client
            .put_settings(&target(&server, Generation::Gen1, "SHPLG-S"), &raw, &token)
            .await
            .expect("outcome");

        assert_eq!(outcome.sections.len(), 2);
        assert!(outcome.sections[0].success);
        assert!(!outcome.sections[1].success);
    }

    #[tokio::test]
    async fn gen2_write_collects_restart_required() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rpc");
                then.status(200)
                    .json_body(serde_json::json!({"id": 1, "result": {"restart_required": true}}));
            })
            .await;

        let document = serde_json::json!({"wifi": {"sta": {"ssid": "new-net", "pass": "secret"}}});
        let raw = serde_json::to_vec(&document).expect("encode");

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let outcome = client
            .put_settings(
                &target(&server, Generation::Gen2, "SNSW-001X16EU"),
                &raw,
                &token,
            )
            .await
            .expect("outcome");

        assert!(outcome.restart_required);
        assert_eq!(outcome.sections.len(), 1);
    }

    #[tokio::test]
    async fn gen2_settings_snapshot_carries_synthesized_auth() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rpc")
                    .json_body_includes(r#"{"method": "Shelly.GetConfig"}"#);
                then.status(200).json_body(serde_json::json!({
                    "id": 1,
                    "result": {"sys": {"device": {"name": "Hallway"}}}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rpc")
                    .json_body_includes(r#"{"method": "Shelly.GetDeviceInfo"}"#);
                then.status(200).json_body(serde_json::json!({
                    "id": 1,
                    "result": {"auth_en": true, "auth_domain": "shellyplus1-441793d2"}
                }));
            })
            .await;

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let raw = client
            .get_settings(&target(&server, Generation::Gen2, "SNSW-001X16EU"), &token)
            .await
            .expect("settings");

        let document: serde_json::Value = serde_json::from_slice(&raw).expect("json");
        assert_eq!(document["auth"]["enable"], true);
        assert_eq!(document["sys"]["device"]["name"], "Hallway");
    }

    #[tokio::test]
    async fn cancellation_preempts_inflight_requests() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/status");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(serde_json::json!({}));
            })
            .await;

        let client = DeviceClient::with_timeouts(Timeouts::default()).expect("client");
        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .get_status(&target(&server, Generation::Gen1, "SHPLG-S"), &token)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, DeviceError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn unresponsive_device_times_out_within_the_read_budget() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/status");
                then.status(200)
                    .delay(Duration::from_secs(5))
                    .json_body(serde_json::json!({}));
            })
            .await;

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let token = CancellationToken::new();
        let err = client
            .get_status(&target(&server, Generation::Gen1, "SHPLG-S"), &token)
            .await
            .expect_err("must time out");
        assert!(err.is_timeout());
        assert!(err.marks_offline());
    }
}
