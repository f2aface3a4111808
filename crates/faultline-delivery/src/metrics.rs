//! Prometheus metrics for notice delivery.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Final state of a notice, used as the `outcome` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted by the collector
    Delivered,
    /// Rejected by the transport or the collector
    Failed,
    /// Dropped by a filter or an ignored environment
    Ignored,
    /// Never attempted: queue full, truncation exhausted, filter fault or closed
    Dropped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
            Self::Dropped => "dropped",
        }
    }
}

pub struct DeliveryMetrics {
    registry: Registry,
    /// Counter: notices by outcome
    pub notices_total: IntCounterVec,
    /// Gauge: notices waiting for a worker
    pub queue_depth: IntGauge,
}

impl DeliveryMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("faultline".to_string()), None)?;

        let notices_total = IntCounterVec::new(
            Opts::new("notices_total", "Notices by delivery outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(notices_total.clone()))?;

        let queue_depth = IntGauge::new("queue_depth", "Notices waiting for a worker")?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            notices_total,
            queue_depth,
        })
    }

    pub fn record(&self, outcome: Outcome) {
        self.notices_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.notices_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
