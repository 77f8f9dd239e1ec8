use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub matches_total: IntCounterVec,
    pub match_latency_seconds: HistogramVec,
    pub grab_claims_total: IntCounterVec,
    pub events_emitted_total: IntCounterVec,
    pub dead_letters_total: IntCounter,
    pub grab_pool_size: IntGauge,
    pub drivers_available: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let matches_total = IntCounterVec::new(
            Opts::new("matches_total", "Ride requests processed by resolution"),
            &["outcome"],
        )
        .expect("valid matches_total metric");

        let match_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "match_latency_seconds",
                "Latency of ride request processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid match_latency_seconds metric");

        let grab_claims_total = IntCounterVec::new(
            Opts::new("grab_claims_total", "Driver claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid grab_claims_total metric");

        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Outbound events published by topic"),
            &["topic"],
        )
        .expect("valid events_emitted_total metric");

        let dead_letters_total = IntCounter::new(
            "dead_letters_total",
            "Events dead-lettered after exhausting delivery attempts",
        )
        .expect("valid dead_letters_total metric");

        let grab_pool_size = IntGauge::new("grab_pool_size", "Orders currently open for grabbing")
            .expect("valid grab_pool_size metric");

        let drivers_available = IntGauge::new("drivers_available", "Drivers currently claimable")
            .expect("valid drivers_available metric");

        registry
            .register(Box::new(matches_total.clone()))
            .expect("register matches_total");
        registry
            .register(Box::new(match_latency_seconds.clone()))
            .expect("register match_latency_seconds");
        registry
            .register(Box::new(grab_claims_total.clone()))
            .expect("register grab_claims_total");
        registry
            .register(Box::new(events_emitted_total.clone()))
            .expect("register events_emitted_total");
        registry
            .register(Box::new(dead_letters_total.clone()))
            .expect("register dead_letters_total");
        registry
            .register(Box::new(grab_pool_size.clone()))
            .expect("register grab_pool_size");
        registry
            .register(Box::new(drivers_available.clone()))
            .expect("register drivers_available");

        Self {
            registry,
            matches_total,
            match_latency_seconds,
            grab_claims_total,
            events_emitted_total,
            dead_letters_total,
            grab_pool_size,
            drivers_available,
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
