use crate::partition::partition;
use crate::store::MetricStore;
use crate::transport::{Transport, TransportError};
use metrix_common::types::Metric;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

/// A chunk that could not be delivered. Its metrics are not resent; the next
/// cycle's snapshot supersedes them.
#[derive(Debug, thiserror::Error)]
#[error("chunk of {size} metric(s) failed: {source}")]
pub struct DispatchError {
    pub size: usize,
    #[source]
    pub source: TransportError,
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Metrics in the snapshot.
    pub metrics: usize,
    /// Chunks the snapshot was split into.
    pub chunks: usize,
    /// Metrics in chunks that were delivered.
    pub delivered: usize,
    pub failures: Vec<DispatchError>,
    /// Sends performed by each worker, indexed by worker number.
    pub sends_per_worker: Vec<usize>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct DispatchOutcome {
    worker: usize,
    size: usize,
    result: Result<(), TransportError>,
}

/// Ships store snapshots through a fixed pool of workers.
///
/// Each cycle spawns exactly `workers` tasks that pull chunks from a shared
/// queue until it is closed. A failed chunk is logged and counted; it never
/// stops the other chunks or the loop.
pub struct BatchDispatcher {
    store: Arc<MetricStore>,
    transport: Arc<dyn Transport>,
    workers: NonZeroUsize,
    span: Span,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<MetricStore>,
        transport: Arc<dyn Transport>,
        workers: NonZeroUsize,
        span: Span,
    ) -> Self {
        Self {
            store,
            transport,
            workers,
            span,
        }
    }

    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    /// Snapshot, partition, send and aggregate once.
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycle().instrument(self.span.clone()).await
    }

    async fn cycle(&self) -> CycleReport {
        let snapshot = self.store.snapshot();
        let metrics = snapshot.len();
        let chunks = partition(snapshot, self.workers);
        let workers = self.workers.get();
        let mut report = CycleReport {
            metrics,
            chunks: chunks.len(),
            sends_per_worker: vec![0; workers],
            ..CycleReport::default()
        };

        // Both queues hold `workers` items and there are never more chunks
        // than workers, so neither feeding nor reporting can block.
        let (work_tx, work_rx) = mpsc::channel::<Vec<Metric>>(workers);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<DispatchOutcome>(workers);

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            let transport = Arc::clone(&self.transport);
            pool.spawn(
                async move {
                    loop {
                        let next = work_rx.lock().await.recv().await;
                        let Some(chunk) = next else {
                            break;
                        };
                        let result = transport.send_batch(&chunk).await;
                        let outcome = DispatchOutcome {
                            worker,
                            size: chunk.len(),
                            result,
                        };
                        if result_tx.send(outcome).await.is_err() {
                            break;
                        }
                    }
                }
                .instrument(Span::current()),
            );
        }

        // The result queue closes once every worker has exited and this
        // sender is gone.
        let coordinator = tokio::spawn(
            async move {
                while let Some(joined) = pool.join_next().await {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Dispatch worker aborted");
                    }
                }
                drop(result_tx);
            }
            .instrument(Span::current()),
        );

        for chunk in chunks {
            if work_tx.send(chunk).await.is_err() {
                tracing::error!("All dispatch workers exited before the queue was fed");
                break;
            }
        }
        drop(work_tx);

        while let Some(outcome) = result_rx.recv().await {
            report.sends_per_worker[outcome.worker] += 1;
            match outcome.result {
                Ok(()) => report.delivered += outcome.size,
                Err(source) => {
                    tracing::error!(
                        worker = outcome.worker,
                        size = outcome.size,
                        error = %source,
                        "Batch dispatch failed"
                    );
                    report.failures.push(DispatchError {
                        size: outcome.size,
                        source,
                    });
                }
            }
        }
        if let Err(e) = coordinator.await {
            tracing::error!(error = %e, "Dispatch coordinator aborted");
        }

        if report.is_clean() {
            tracing::debug!(
                metrics = report.metrics,
                chunks = report.chunks,
                "Dispatch cycle complete"
            );
        } else {
            tracing::warn!(
                metrics = report.metrics,
                chunks = report.chunks,
                failed = report.failures.len(),
                delivered = report.delivered,
                "Dispatch cycle finished with failures"
            );
        }
        report
    }

    /// Runs a cycle every `period`, the first one `period` after start.
    ///
    /// Cancellation stops new cycles; a cycle already running is finished.
    pub async fn run(&self, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.span.in_scope(|| {
            tracing::info!(
                interval_secs = period.as_secs(),
                workers = self.workers.get(),
                "Dispatcher started"
            )
        });
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        self.span.in_scope(|| tracing::info!("Dispatcher stopped"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Barrier;

    #[derive(Default)]
    struct RecordingTransport {
        batches: StdMutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_batch(&self, chunk: &[Metric]) -> Result<(), TransportError> {
            self.batches.lock().unwrap().push(chunk.to_vec());
            Ok(())
        }
    }

    /// Fails any chunk containing the named metric.
    struct PoisonedTransport {
        poison: &'static str,
        delivered: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for PoisonedTransport {
        async fn send_batch(&self, chunk: &[Metric]) -> Result<(), TransportError> {
            if chunk.iter().any(|m| m.id == self.poison) {
                return Err(TransportError::Status {
                    attempts: 3,
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let mut delivered = self.delivered.lock().unwrap();
            delivered.extend(chunk.iter().map(|m| m.id.clone()));
            Ok(())
        }
    }

    /// Every send waits until `parties` sends are in flight at once.
    struct BarrierTransport {
        barrier: Barrier,
    }

    #[async_trait]
    impl Transport for BarrierTransport {
        async fn send_batch(&self, _chunk: &[Metric]) -> Result<(), TransportError> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    fn store_with(n: usize) -> Arc<MetricStore> {
        let store = Arc::new(MetricStore::new());
        for i in 0..n {
            store.update_gauge(&format!("m{i:02}"), i as f64).unwrap();
        }
        store
    }

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn every_metric_sent_exactly_once() {
        let store = store_with(23);
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = BatchDispatcher::new(store, transport.clone(), nz(4), Span::none());

        let report = dispatcher.run_cycle().await;
        assert!(report.is_clean());
        assert_eq!(report.metrics, 23);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.delivered, 23);

        let batches = transport.batches.lock().unwrap();
        assert_eq!(batches.len(), 4);
        let ids: Vec<&str> = batches.iter().flatten().map(|m| m.id.as_str()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 23);
        assert_eq!(unique.len(), 23);
        assert!(batches.iter().all(|b| b.len() <= 6));
    }

    #[tokio::test]
    async fn empty_store_sends_nothing() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher =
            BatchDispatcher::new(store_with(0), transport.clone(), nz(5), Span::none());

        let report = dispatcher.run_cycle().await;
        assert!(report.is_clean());
        assert_eq!(report.chunks, 0);
        assert_eq!(report.sends_per_worker, vec![0; 5]);
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_chunk_does_not_block_the_rest() {
        let transport = Arc::new(PoisonedTransport {
            poison: "m01",
            delivered: StdMutex::new(Vec::new()),
        });
        let dispatcher =
            BatchDispatcher::new(store_with(6), transport.clone(), nz(3), Span::none());

        let report = dispatcher.run_cycle().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].size, 2);
        assert_eq!(report.delivered, 4);

        let mut delivered = transport.delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, ["m02", "m03", "m04", "m05"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fewer_chunks_than_workers_all_in_flight_together() {
        // 3 chunks, 8 workers: the barrier only opens if three distinct
        // workers are sending concurrently, and the idle five must still exit.
        let transport = Arc::new(BarrierTransport {
            barrier: Barrier::new(3),
        });
        let dispatcher = BatchDispatcher::new(store_with(3), transport, nz(8), Span::none());

        let report = tokio::time::timeout(Duration::from_secs(5), dispatcher.run_cycle())
            .await
            .expect("dispatch cycle deadlocked");
        assert!(report.is_clean());
        assert_eq!(report.sends_per_worker.iter().sum::<usize>(), 3);
        assert_eq!(report.sends_per_worker.iter().filter(|&&n| n == 1).count(), 3);
        assert_eq!(report.sends_per_worker.iter().filter(|&&n| n == 0).count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loop_stops_before_next_cycle() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(BatchDispatcher::new(
            store_with(2),
            transport.clone(),
            nz(2),
            Span::none(),
        ));
        let token = CancellationToken::new();
        let handle = {
            let dispatcher = Arc::clone(&dispatcher);
            let token = token.clone();
            tokio::spawn(async move { dispatcher.run(Duration::from_secs(10), token).await })
        };

        tokio::time::sleep(Duration::from_secs(25)).await;
        token.cancel();
        handle.await.unwrap();
        // Cycles at 10 s and 20 s, two chunks each.
        assert_eq!(transport.batches.lock().unwrap().len(), 4);
    }
}
