use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

pub struct Metrics {
    requests_total: IntCounter,
    request_duration: Histogram,
    in_flight: IntGauge,
    processed_bytes_total: IntCounter,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "prediction_requests_total",
            "Total number of prediction requests",
        ))
        .unwrap();
        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "prediction_duration_seconds",
            "Wall-clock duration of prediction requests",
        ))
        .unwrap();
        let in_flight = IntGauge::with_opts(Opts::new(
            "predictions_in_flight",
            "Prediction requests currently being handled",
        ))
        .unwrap();
        let processed_bytes_total = IntCounter::with_opts(Opts::new(
            "processed_image_bytes_total",
            "Cumulative size of uploaded image payloads",
        ))
        .unwrap();

        registry.register(Box::new(requests_total.clone())).unwrap();
        registry.register(Box::new(request_duration.clone())).unwrap();
        registry.register(Box::new(in_flight.clone())).unwrap();
        registry
            .register(Box::new(processed_bytes_total.clone()))
            .unwrap();

        Metrics {
            requests_total,
            request_duration,
            in_flight,
            processed_bytes_total,
            registry,
        }
    }

    /// Starts tracking one request. The returned guard holds the in-flight
    /// gauge and records duration and count when dropped, on every exit path.
    pub fn start_request(&self) -> RequestTracker<'_> {
        self.in_flight.inc();
        RequestTracker {
            metrics: self,
            started: Instant::now(),
        }
    }

    pub fn record_payload_bytes(&self, bytes: u64) {
        self.processed_bytes_total.inc_by(bytes);
    }
}

pub struct RequestTracker<'a> {
    metrics: &'a Metrics,
    started: Instant,
}

impl Drop for RequestTracker<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.dec();
        self.metrics
            .request_duration
            .observe(self.started.elapsed().as_secs_f64());
        self.metrics.requests_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn three_requests_count_three_and_release_the_gauge() {
        let metrics = Metrics::new();

        for _ in 0..3 {
            let tracker = metrics.start_request();
            drop(tracker);
        }

        assert_eq!(metrics.requests_total.get(), 3);
        assert_eq!(metrics.in_flight.get(), 0);
        assert_eq!(metrics.request_duration.get_sample_count(), 3);
    }

    #[test]
    fn in_flight_gauge_tracks_live_requests() {
        let metrics = Metrics::new();

        let tracker = metrics.start_request();
        assert_eq!(metrics.in_flight.get(), 1);

        drop(tracker);
        assert_eq!(metrics.in_flight.get(), 0);
    }

    #[test]
    fn payload_bytes_accumulate() {
        let metrics = Metrics::new();

        metrics.record_payload_bytes(100);
        metrics.record_payload_bytes(250);

        assert_eq!(metrics.processed_bytes_total.get(), 350);
    }

    #[test]
    fn registry_exposes_text_format() {
        let metrics = Metrics::new();
        drop(metrics.start_request());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let exposition = String::from_utf8(buffer).unwrap();

        assert!(exposition.contains("prediction_requests_total 1"));
        assert!(exposition.contains("predictions_in_flight 0"));
    }
}
