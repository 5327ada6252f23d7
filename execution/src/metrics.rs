use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Sweep {
    Promote,
    Expire,
    Advance,
    Reclaim,
}

impl Sweep {
    pub const ALL: [Sweep; 4] = [Sweep::Promote, Sweep::Expire, Sweep::Advance, Sweep::Reclaim];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sweep::Promote => "promote",
            Sweep::Expire => "expire",
            Sweep::Advance => "advance",
            Sweep::Reclaim => "reclaim",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SweepLabels {
    pub sweep: Sweep,
}

/// Scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub ticks: Counter,
    pub transitions: Family<SweepLabels, Counter>,
    pub failures: Family<SweepLabels, Counter>,
}

impl SchedulerMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "scheduler_ticks",
            "Lifecycle scheduler ticks run",
            metrics.ticks.clone(),
        );
        registry.register(
            "scheduler_transitions",
            "Lifecycle transitions committed, by sweep",
            metrics.transitions.clone(),
        );
        registry.register(
            "scheduler_failures",
            "Lifecycle jobs that failed, by sweep",
            metrics.failures.clone(),
        );
        metrics
    }

    pub fn transition(&self, sweep: Sweep) {
        self.transitions.get_or_create(&SweepLabels { sweep }).inc();
    }

    pub fn failure(&self, sweep: Sweep) {
        self.failures.get_or_create(&SweepLabels { sweep }).inc();
    }
}
