//! Observability event surface (§6.6), part of the observed-execution
//! contract every Step Handler honors (§4.8): record start/success/
//! failure/rows/metadata for a step, then query alerts and aggregate
//! metrics. Grounded on the original `SimpleObservabilityManager`
//! (`observability/metrics.py`) — a lightweight in-process recorder,
//! not an external metrics backend.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Severity of a [`PerformanceAlert`], mirroring the original's four
/// levels even though only `Warning` is currently raised (slow steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct PerformanceAlert {
    pub component: String,
    pub alert_type: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub step_id: String,
}

/// Everything recorded about one step's most recent execution attempt.
#[derive(Debug, Clone)]
struct StepMetrics {
    step_type: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    success: bool,
    error_message: Option<String>,
    rows_affected: u64,
    metadata: Map<String, Value>,
}

impl StepMetrics {
    fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time.unwrap_or(now) - self.start_time).num_milliseconds()
    }
}

/// Every method takes `&self` (not `&mut self`): handlers run on
/// worker threads behind an `Arc<dyn Observability>`, so recording is
/// an interior-mutability operation, same as `StateBackend`.
pub trait Observability: Send + Sync {
    fn record_step_start(&self, step_id: &str, step_type: &str);
    fn record_step_success(&self, step_id: &str, event: Map<String, Value>);
    fn record_step_failure(&self, step_id: &str, step_type: &str, message: &str, duration_ms: i64);
    fn record_rows_affected(&self, step_id: &str, rows: u64);
    fn add_step_metadata(&self, step_id: &str, metadata: Map<String, Value>);
    fn get_alerts(&self) -> Vec<PerformanceAlert>;
    fn get_metrics(&self) -> Map<String, Value>;
}

/// In-process `Observability`, the only implementation spec §6.6 calls
/// for: a step exceeding `duration_threshold_ms` raises a `Warning`
/// alert, every recorded step rolls up into `get_metrics()`.
pub struct SimpleObservabilityManager {
    run_id: String,
    duration_threshold_ms: i64,
    steps: Mutex<HashMap<String, StepMetrics>>,
    alerts: Mutex<Vec<PerformanceAlert>>,
}

impl SimpleObservabilityManager {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self::with_duration_threshold(run_id, 5_000)
    }

    pub fn with_duration_threshold(run_id: impl Into<String>, duration_threshold_ms: i64) -> Self {
        Self {
            run_id: run_id.into(),
            duration_threshold_ms,
            steps: Mutex::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
        }
    }

    fn check_for_performance_alert(&self, step_id: &str, metrics: &StepMetrics) {
        let duration_ms = metrics.duration_ms(Utc::now());
        if duration_ms > self.duration_threshold_ms {
            self.alerts.lock().expect("observability alerts mutex poisoned").push(PerformanceAlert {
                component: "StepHandler".into(),
                alert_type: "SlowStepWarning".into(),
                message: format!(
                    "step '{step_id}' exceeded duration threshold: {duration_ms}ms > {}ms",
                    self.duration_threshold_ms
                ),
                severity: AlertSeverity::Warning,
                timestamp: Utc::now(),
                step_id: step_id.to_string(),
            });
        }
    }
}

impl Observability for SimpleObservabilityManager {
    fn record_step_start(&self, step_id: &str, step_type: &str) {
        let mut steps = self.steps.lock().expect("observability steps mutex poisoned");
        steps.insert(
            step_id.to_string(),
            StepMetrics {
                step_type: step_type.to_string(),
                start_time: Utc::now(),
                end_time: None,
                success: true,
                error_message: None,
                rows_affected: 0,
                metadata: Map::new(),
            },
        );
    }

    fn record_step_success(&self, step_id: &str, event: Map<String, Value>) {
        let mut steps = self.steps.lock().expect("observability steps mutex poisoned");
        let metrics = steps.entry(step_id.to_string()).or_insert_with(|| StepMetrics {
            step_type: "unknown".into(),
            start_time: Utc::now(),
            end_time: None,
            success: true,
            error_message: None,
            rows_affected: 0,
            metadata: Map::new(),
        });
        metrics.end_time = Some(Utc::now());
        metrics.success = true;
        metrics.metadata.extend(event);
        let snapshot = metrics.clone();
        drop(steps);
        self.check_for_performance_alert(step_id, &snapshot);
    }

    fn record_step_failure(&self, step_id: &str, step_type: &str, message: &str, duration_ms: i64) {
        let mut steps = self.steps.lock().expect("observability steps mutex poisoned");
        let end_time = Utc::now();
        let start_time = end_time - chrono::Duration::milliseconds(duration_ms);
        steps.insert(
            step_id.to_string(),
            StepMetrics {
                step_type: step_type.to_string(),
                start_time,
                end_time: Some(end_time),
                success: false,
                error_message: Some(message.to_string()),
                rows_affected: 0,
                metadata: Map::new(),
            },
        );
    }

    fn record_rows_affected(&self, step_id: &str, rows: u64) {
        let mut steps = self.steps.lock().expect("observability steps mutex poisoned");
        if let Some(metrics) = steps.get_mut(step_id) {
            metrics.rows_affected = rows;
        }
    }

    fn add_step_metadata(&self, step_id: &str, metadata: Map<String, Value>) {
        let mut steps = self.steps.lock().expect("observability steps mutex poisoned");
        if let Some(metrics) = steps.get_mut(step_id) {
            metrics.metadata.extend(metadata);
        }
    }

    fn get_alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.lock().expect("observability alerts mutex poisoned").clone()
    }

    fn get_metrics(&self) -> Map<String, Value> {
        let steps = self.steps.lock().expect("observability steps mutex poisoned");
        let now = Utc::now();
        let completed: Vec<&StepMetrics> = steps.values().filter(|m| m.end_time.is_some()).collect();

        let mut step_details = Map::new();
        for (step_id, metrics) in steps.iter() {
            let mut detail = Map::new();
            detail.insert("step_type".into(), Value::String(metrics.step_type.clone()));
            detail.insert("duration_ms".into(), Value::from(metrics.duration_ms(now)));
            detail.insert("success".into(), Value::Bool(metrics.success));
            detail.insert("rows_affected".into(), Value::from(metrics.rows_affected));
            detail.insert(
                "error_message".into(),
                metrics.error_message.clone().map(Value::String).unwrap_or(Value::Null),
            );
            detail.insert("metadata".into(), Value::Object(metrics.metadata.clone()));
            step_details.insert(step_id.clone(), Value::Object(detail));
        }

        let mut metrics = Map::new();
        metrics.insert("run_id".into(), Value::String(self.run_id.clone()));
        metrics.insert("total_steps".into(), Value::from(steps.len()));
        metrics.insert("completed_steps".into(), Value::from(completed.len()));
        metrics.insert("successful_steps".into(), Value::from(completed.iter().filter(|m| m.success).count()));
        metrics.insert("failed_steps".into(), Value::from(completed.iter().filter(|m| !m.success).count()));
        metrics.insert(
            "total_rows_affected".into(),
            Value::from(completed.iter().map(|m| m.rows_affected).sum::<u64>()),
        );
        metrics.insert("alerts_generated".into(), Value::from(self.get_alerts().len()));
        metrics.insert("step_details".into(), Value::Object(step_details));
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_step_start_then_success_marks_it_complete() {
        let obs = SimpleObservabilityManager::new("run-1");
        obs.record_step_start("load_orders_0", "load");
        let mut event = Map::new();
        event.insert("chunks_processed".into(), json!(2));
        obs.record_step_success("load_orders_0", event);
        obs.record_rows_affected("load_orders_0", 42);

        let metrics = obs.get_metrics();
        assert_eq!(metrics["total_steps"], json!(1));
        assert_eq!(metrics["successful_steps"], json!(1));
        assert_eq!(metrics["total_rows_affected"], json!(42));
    }

    #[test]
    fn record_step_failure_is_reflected_in_metrics() {
        let obs = SimpleObservabilityManager::new("run-1");
        obs.record_step_start("transform_bad_0", "transform");
        obs.record_step_failure("transform_bad_0", "transform", "boom", 12);

        let metrics = obs.get_metrics();
        assert_eq!(metrics["failed_steps"], json!(1));
        assert_eq!(metrics["successful_steps"], json!(0));
    }

    #[test]
    fn slow_step_raises_a_warning_alert() {
        let obs = SimpleObservabilityManager::with_duration_threshold("run-1", 0);
        obs.record_step_start("slow_step_0", "transform");
        std::thread::sleep(std::time::Duration::from_millis(2));
        obs.record_step_success("slow_step_0", Map::new());

        let alerts = obs.get_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].step_id, "slow_step_0");
    }

    #[test]
    fn add_step_metadata_merges_into_step_details() {
        let obs = SimpleObservabilityManager::new("run-1");
        obs.record_step_start("export_orders_0", "export");
        let mut meta = Map::new();
        meta.insert("destination_uri".into(), json!("s3://bucket/orders.csv"));
        obs.add_step_metadata("export_orders_0", meta);
        obs.record_step_success("export_orders_0", Map::new());

        let metrics = obs.get_metrics();
        let detail = &metrics["step_details"]["export_orders_0"];
        assert_eq!(detail["metadata"]["destination_uri"], json!("s3://bucket/orders.csv"));
    }
}
