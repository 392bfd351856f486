//! Prometheus metrics for the backlog runner and pod watchdog.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ResultLabel {
    pub result: String,
}

impl prometheus_client::encoding::EncodeLabelSet for ResultLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("result", self.result.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RunnerMetrics {
    pub backlog_queue_depth: Gauge,
    pub backlog_claims_total: Counter,
    pub backlog_attempts_exhausted_total: Counter,
    pub ewms_workflow_requests: Family<ResultLabel, Counter>,
    pub k8s_job_creates: Family<ResultLabel, Counter>,
    pub watchdog_rescans_triggered_total: Counter,
    pub watchdog_ticks_total: Counter,
    pub registry: Arc<Registry>,
}

impl RunnerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let backlog_queue_depth = Gauge::default();
        registry.register(
            "skydriver_backlog_queue_depth",
            "Number of entries currently in the scan backlog",
            backlog_queue_depth.clone(),
        );

        let backlog_claims_total = Counter::default();
        registry.register(
            "skydriver_backlog_claims_total",
            "Total backlog entries claimed by this runner",
            backlog_claims_total.clone(),
        );

        let backlog_attempts_exhausted_total = Counter::default();
        registry.register(
            "skydriver_backlog_attempts_exhausted_total",
            "Backlog entries purged for exceeding MAX_ATTEMPTS",
            backlog_attempts_exhausted_total.clone(),
        );

        let ewms_workflow_requests = Family::<ResultLabel, Counter>::default();
        registry.register(
            "skydriver_ewms_workflow_requests_total",
            "EWMS workflow-request calls made by the backlog runner",
            ewms_workflow_requests.clone(),
        );

        let k8s_job_creates = Family::<ResultLabel, Counter>::default();
        registry.register(
            "skydriver_k8s_job_creates_total",
            "Kubernetes job creation attempts made by the backlog runner",
            k8s_job_creates.clone(),
        );

        let watchdog_rescans_triggered_total = Counter::default();
        registry.register(
            "skydriver_watchdog_rescans_triggered_total",
            "Rescans triggered by the pod watchdog",
            watchdog_rescans_triggered_total.clone(),
        );

        let watchdog_ticks_total = Counter::default();
        registry.register(
            "skydriver_watchdog_ticks_total",
            "Pod watchdog reconciliation ticks completed",
            watchdog_ticks_total.clone(),
        );

        Self {
            backlog_queue_depth,
            backlog_claims_total,
            backlog_attempts_exhausted_total,
            ewms_workflow_requests,
            k8s_job_creates,
            watchdog_rescans_triggered_total,
            watchdog_ticks_total,
            registry: Arc::new(registry),
        }
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

impl Default for RunnerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_all_metrics() {
        let metrics = RunnerMetrics::new();
        let output = metrics.encode();
        assert!(output.contains("skydriver_backlog_queue_depth"));
        assert!(output.contains("skydriver_watchdog_rescans_triggered_total"));
    }

    #[test]
    fn result_labels_distinguish_success_and_failure() {
        let metrics = RunnerMetrics::new();
        metrics
            .k8s_job_creates
            .get_or_create(&ResultLabel { result: "ok".into() })
            .inc();
        metrics
            .k8s_job_creates
            .get_or_create(&ResultLabel { result: "error".into() })
            .inc();
        let output = metrics.encode();
        assert!(output.contains("result=\"ok\""));
        assert!(output.contains("result=\"error\""));
    }
}
