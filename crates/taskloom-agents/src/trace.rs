use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

/// Caps applied to stage snapshots so traces stay small and never carry whole
/// payloads into logs.
const MAX_STRING_LEN: usize = 200;
const MAX_NESTED_STRING_LEN: usize = 100;
const MAX_MAP_ENTRIES: usize = 5;
const MAX_LIST_ITEMS: usize = 3;

/// One recorded pipeline stage.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStage {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view of one request's stages, returned once at request end.
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub request_id: String,
    pub total_latency_ms: f64,
    pub stages: Vec<TraceStage>,
    pub success: bool,
    pub failed_stage: Option<String>,
}

/// Per-request correlation id plus an ordered stage log.
///
/// Tracers are created at request start and discarded with the response; they
/// are diagnostics, not a durable audit log.
pub struct RequestTracer {
    request_id: String,
    started: Instant,
    stages: Vec<TraceStage>,
    enabled: bool,
}

impl RequestTracer {
    pub fn start(request_id: Option<String>) -> Self {
        let request_id =
            request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string());
        info!("trace started, request_id={request_id}");
        Self {
            request_id,
            started: Instant::now(),
            stages: Vec::new(),
            enabled: true,
        }
    }

    /// A tracer that records nothing; used when tracing is switched off.
    pub fn disabled() -> Self {
        Self {
            request_id: String::new(),
            started: Instant::now(),
            stages: Vec::new(),
            enabled: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Begin recording a stage; finish with `ok()` or `err(..)`.
    pub fn stage(&mut self, name: &str) -> StageRecorder<'_> {
        StageRecorder {
            tracer: self,
            name: name.to_string(),
            input: None,
            output: None,
            latency_ms: None,
        }
    }

    fn push(&mut self, stage: TraceStage) {
        if !self.enabled {
            return;
        }
        if stage.success {
            info!(
                "trace stage request_id={} stage={} status=success",
                self.request_id, stage.stage
            );
        } else {
            error!(
                "trace stage request_id={} stage={} status=failed error={}",
                self.request_id,
                stage.stage,
                stage.error.as_deref().unwrap_or("unknown")
            );
        }
        self.stages.push(stage);
    }

    pub fn report(&self) -> TraceReport {
        let total_latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let success = self.stages.iter().all(|s| s.success);
        let failed_stage = self
            .stages
            .iter()
            .find(|s| !s.success)
            .map(|s| s.stage.clone());

        TraceReport {
            request_id: self.request_id.clone(),
            total_latency_ms,
            stages: self.stages.clone(),
            success,
            failed_stage,
        }
    }
}

/// Builder for one stage record.
pub struct StageRecorder<'a> {
    tracer: &'a mut RequestTracer,
    name: String,
    input: Option<Value>,
    output: Option<Value>,
    latency_ms: Option<f64>,
}

impl StageRecorder<'_> {
    pub fn input(mut self, value: Value) -> Self {
        self.input = Some(truncate_value(&value, MAX_STRING_LEN));
        self
    }

    pub fn output(mut self, value: Value) -> Self {
        self.output = Some(truncate_value(&value, MAX_STRING_LEN));
        self
    }

    pub fn latency_ms(mut self, latency: f64) -> Self {
        self.latency_ms = Some(latency);
        self
    }

    pub fn ok(self) {
        self.finish(true, None);
    }

    pub fn err(self, error: impl Into<String>) {
        let error = clip(&error.into(), MAX_STRING_LEN);
        self.finish(false, Some(error));
    }

    fn finish(self, success: bool, error: Option<String>) {
        let stage = TraceStage {
            stage: self.name,
            input: self.input,
            output: self.output,
            success,
            error,
            latency_ms: self.latency_ms,
            timestamp: Utc::now(),
        };
        self.tracer.push(stage);
    }
}

/// Defensively cap snapshot size: strings are clipped, collections keep only
/// their first few entries.
fn truncate_value(value: &Value, max_len: usize) -> Value {
    match value {
        Value::String(s) => Value::String(clip(s, max_len)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .take(MAX_LIST_ITEMS)
                .map(|item| truncate_value(item, MAX_NESTED_STRING_LEN))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .take(MAX_MAP_ENTRIES)
                .map(|(k, v)| (k.clone(), truncate_value(v, MAX_NESTED_STRING_LEN)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn clip(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_aggregates_success_and_first_failure() {
        let mut tracer = RequestTracer::start(Some("req-1".to_string()));
        tracer.stage("init").ok();
        tracer.stage("llm_primary").err("status 503");
        tracer.stage("llm_fallback").ok();

        let report = tracer.report();
        assert_eq!(report.request_id, "req-1");
        assert_eq!(report.stages.len(), 3);
        assert!(!report.success);
        assert_eq!(report.failed_stage.as_deref(), Some("llm_primary"));
    }

    #[test]
    fn all_stages_passing_means_overall_success() {
        let mut tracer = RequestTracer::start(None);
        tracer.stage("init").ok();
        tracer.stage("done").ok();

        let report = tracer.report();
        assert!(report.success);
        assert!(report.failed_stage.is_none());
        assert_eq!(report.request_id.len(), 8);
    }

    #[test]
    fn long_strings_are_clipped() {
        let mut tracer = RequestTracer::start(None);
        tracer
            .stage("llm_primary")
            .input(json!("m".repeat(5000)))
            .ok();

        let report = tracer.report();
        let snapshot = report.stages[0].input.as_ref().unwrap().as_str().unwrap();
        assert!(snapshot.len() <= MAX_STRING_LEN + 3);
        assert!(snapshot.ends_with("..."));
    }

    #[test]
    fn collections_keep_only_leading_entries() {
        let mut tracer = RequestTracer::start(None);
        let wide: Vec<i64> = (0..50).collect();
        tracer.stage("tools").output(json!(wide)).ok();

        let report = tracer.report();
        let snapshot = report.stages[0].output.as_ref().unwrap();
        assert_eq!(snapshot.as_array().unwrap().len(), MAX_LIST_ITEMS);
    }

    #[test]
    fn nested_object_values_are_clipped() {
        let mut tracer = RequestTracer::start(None);
        tracer
            .stage("extract")
            .input(json!({"reply": "r".repeat(500), "n": 1}))
            .ok();

        let report = tracer.report();
        let snapshot = report.stages[0].input.as_ref().unwrap();
        let reply = snapshot["reply"].as_str().unwrap();
        assert!(reply.len() <= MAX_NESTED_STRING_LEN + 3);
    }

    #[test]
    fn disabled_tracer_records_nothing() {
        let mut tracer = RequestTracer::disabled();
        tracer.stage("init").ok();
        tracer.stage("llm_primary").err("boom");

        let report = tracer.report();
        assert!(report.stages.is_empty());
        assert!(report.success);
    }
}
