//! Prometheus metrics for the REST server, mirroring
//! `skydriver-runner`'s `RunnerMetrics` shape.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabel {
    pub outcome: String,
}

impl prometheus_client::encoding::EncodeLabelSet for OutcomeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ServerMetrics {
    pub scans_admitted_total: Family<OutcomeLabel, Counter>,
    pub scans_deleted_total: Counter,
    pub rescans_total: Counter,
    registry: Arc<Registry>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let scans_admitted_total = Family::<OutcomeLabel, Counter>::default();
        registry.register(
            "skydriver_scans_admitted_total",
            "Scan admission attempts, by whether the job started immediately or was backlogged",
            scans_admitted_total.clone(),
        );

        let scans_deleted_total = Counter::default();
        registry.register(
            "skydriver_scans_deleted_total",
            "Scans deleted via DELETE /scan/{id}",
            scans_deleted_total.clone(),
        );

        let rescans_total = Counter::default();
        registry.register(
            "skydriver_rescans_total",
            "Rescans issued via POST /scan/{id}/actions/rescan",
            rescans_total.clone(),
        );

        Self {
            scans_admitted_total,
            scans_deleted_total,
            rescans_total,
            registry: Arc::new(registry),
        }
    }

    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_all_metrics() {
        let metrics = ServerMetrics::new();
        let output = metrics.encode();
        assert!(output.contains("skydriver_scans_admitted_total"));
        assert!(output.contains("skydriver_rescans_total"));
    }
}
