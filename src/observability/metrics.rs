use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub contract_transitions_total: IntCounterVec,
    pub offers_total: IntCounterVec,
    pub feed_fetches_total: IntCounterVec,
    pub feed_fetch_latency_seconds: Histogram,
    pub active_feeds: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let contract_transitions_total = IntCounterVec::new(
            Opts::new(
                "contract_transitions_total",
                "Contract lifecycle transitions by event and outcome",
            ),
            &["event", "outcome"],
        )
        .expect("valid contract_transitions_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Offer ledger operations by outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let feed_fetches_total = IntCounterVec::new(
            Opts::new("feed_fetches_total", "Discovery feed fetches by outcome"),
            &["outcome"],
        )
        .expect("valid feed_fetches_total metric");

        let feed_fetch_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "feed_fetch_latency_seconds",
            "Latency of discovery feed fetches in seconds",
        ))
        .expect("valid feed_fetch_latency_seconds metric");

        let active_feeds = IntGauge::new("active_feeds", "Discovery feeds currently running")
            .expect("valid active_feeds metric");

        registry
            .register(Box::new(contract_transitions_total.clone()))
            .expect("register contract_transitions_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(feed_fetches_total.clone()))
            .expect("register feed_fetches_total");
        registry
            .register(Box::new(feed_fetch_latency_seconds.clone()))
            .expect("register feed_fetch_latency_seconds");
        registry
            .register(Box::new(active_feeds.clone()))
            .expect("register active_feeds");

        Self {
            registry,
            contract_transitions_total,
            offers_total,
            feed_fetches_total,
            feed_fetch_latency_seconds,
            active_feeds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
