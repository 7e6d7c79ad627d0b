//! Prometheus counters for the take accounting core. Hosts expose the
//! registry through whatever scrape endpoint they already run.

use prometheus::{IntCounter, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub takes_assigned_total: IntCounter,
    pub pool_resizes_total: IntCounter,
    pub eligibility_rejections_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let takes_assigned_total = IntCounter::new(
            "takes_assigned_total",
            "Completed take assignments (including zero-amount removals)",
        )
        .expect("create counter");
        let pool_resizes_total =
            IntCounter::new("takes_pool_resizes_total", "Completed pool resizes")
                .expect("create counter");
        let eligibility_rejections_total = IntCounter::new(
            "takes_eligibility_rejections_total",
            "Assignments rejected by the eligibility gate",
        )
        .expect("create counter");

        registry
            .register(Box::new(takes_assigned_total.clone()))
            .expect("register counter");
        registry
            .register(Box::new(pool_resizes_total.clone()))
            .expect("register counter");
        registry
            .register(Box::new(eligibility_rejections_total.clone()))
            .expect("register counter");

        Self {
            registry,
            takes_assigned_total,
            pool_resizes_total,
            eligibility_rejections_total,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
