use crate::store::MetricStore;
use metrix_collector::Collector;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Polls every collector into the shared store.
///
/// A failing collector is logged and skipped for that tick; the others
/// still run.
pub struct Sampler {
    collectors: Vec<Box<dyn Collector>>,
    store: Arc<MetricStore>,
    span: Span,
}

impl Sampler {
    pub fn new(collectors: Vec<Box<dyn Collector>>, store: Arc<MetricStore>, span: Span) -> Self {
        Self {
            collectors,
            store,
            span,
        }
    }

    /// Runs every collector once. Returns the number of updates applied.
    pub fn tick(&mut self) -> usize {
        let _entered = self.span.enter();
        let mut applied = 0;
        for collector in &mut self.collectors {
            match collector.collect() {
                Ok(metrics) => {
                    for metric in metrics {
                        match self.store.apply(metric) {
                            Ok(()) => applied += 1,
                            Err(e) => tracing::warn!(
                                collector = collector.name(),
                                error = %e,
                                "Update ignored"
                            ),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(collector = collector.name(), error = %e, "Collection failed")
                }
            }
        }
        tracing::debug!(applied, stored = self.store.len(), "Sampled metrics");
        applied
    }

    /// Ticks immediately, then every `period` until `token` is cancelled.
    pub async fn run(mut self, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.span.in_scope(|| {
            tracing::info!(
                interval_secs = period.as_secs(),
                collectors = self.collectors.len(),
                "Sampler started"
            )
        });
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        self.span.in_scope(|| tracing::info!("Sampler stopped"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use metrix_collector::poll::PollCollector;
    use metrix_common::types::Metric;

    struct BrokenCollector;

    impl Collector for BrokenCollector {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            bail!("cannot read memory info")
        }
    }

    struct FixedCollector(Vec<Metric>);

    impl Collector for FixedCollector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Metric>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn failing_collector_does_not_stop_the_tick() {
        let store = Arc::new(MetricStore::new());
        let mut sampler = Sampler::new(
            vec![
                Box::new(BrokenCollector),
                Box::new(PollCollector::new()),
            ],
            Arc::clone(&store),
            Span::none(),
        );
        assert_eq!(sampler.tick(), 2);
        assert_eq!(sampler.tick(), 2);
        assert_eq!(store.get("PollCount"), Some(Metric::counter("PollCount", 2)));
        assert!(store.get("RandomValue").is_some());
    }

    #[test]
    fn kind_clash_skips_only_the_offending_update() {
        let store = Arc::new(MetricStore::new());
        let mut sampler = Sampler::new(
            vec![
                Box::new(FixedCollector(vec![Metric::counter("x", 1)])),
                Box::new(FixedCollector(vec![
                    Metric::gauge("x", 5.0),
                    Metric::gauge("y", 5.0),
                ])),
            ],
            Arc::clone(&store),
            Span::none(),
        );
        assert_eq!(sampler.tick(), 2);
        assert_eq!(store.get("x"), Some(Metric::counter("x", 1)));
        assert_eq!(store.get("y"), Some(Metric::gauge("y", 5.0)));
    }

    #[test]
    fn overflowing_counter_is_skipped_and_kept() {
        let store = Arc::new(MetricStore::new());
        let mut sampler = Sampler::new(
            vec![Box::new(FixedCollector(vec![
                Metric::counter("bytes", i64::MAX / 2 + 1),
                Metric::gauge("y", 1.0),
            ]))],
            Arc::clone(&store),
            Span::none(),
        );
        assert_eq!(sampler.tick(), 2);
        assert_eq!(sampler.tick(), 1);
        assert_eq!(
            store.get("bytes"),
            Some(Metric::counter("bytes", i64::MAX / 2 + 1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_cancelled() {
        let store = Arc::new(MetricStore::new());
        let sampler = Sampler::new(
            vec![Box::new(PollCollector::new())],
            Arc::clone(&store),
            Span::none(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(sampler.run(Duration::from_secs(2), token.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
        handle.await.unwrap();
        // Ticks at 0, 2 and 4 seconds.
        assert_eq!(store.get("PollCount"), Some(Metric::counter("PollCount", 3)));
    }
}
