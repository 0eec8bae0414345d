use crate::config::{AgentConfig, ConfigError};
use crate::dispatcher::BatchDispatcher;
use crate::sampler::Sampler;
use crate::store::MetricStore;
use crate::transport::{resolve_real_ip, HttpTransport, Transport};
use anyhow::{Context, Result};
use metrix_collector::{default_collectors, Collector};
use metrix_common::cipher::PayloadEncryptor;
use metrix_common::signature::HashSigner;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The sampler and dispatcher loops wired to one store and one transport.
pub struct Agent {
    store: Arc<MetricStore>,
    sampler: Sampler,
    dispatcher: BatchDispatcher,
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    report_interval: Duration,
}

impl Agent {
    /// Validates `config`, resolves this host's address and builds the HTTP
    /// transport and default collectors.
    ///
    /// An unreadable public key disables encryption instead of failing.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        config.validate()?;
        let real_ip =
            resolve_real_ip().context("failed to resolve the agent's outward-facing address")?;

        let transport_span = tracing::info_span!("transport", endpoint = %config.address);
        let mut transport =
            HttpTransport::new(&config.address, config.request_timeout(), transport_span)?
                .with_signer(HashSigner::new(config.key.as_deref()))
                .with_real_ip(real_ip);
        if let Some(path) = &config.crypto_key {
            match PayloadEncryptor::from_pem_file(path) {
                Ok(encryptor) => {
                    tracing::info!(path = %path.display(), "Payload encryption enabled");
                    transport = transport.with_encryptor(encryptor);
                }
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Invalid public key, payload encryption disabled"
                ),
            }
        }
        tracing::info!(
            real_ip = %real_ip,
            endpoint = transport.endpoint(),
            signed = config.key.as_deref().is_some_and(|k| !k.is_empty()),
            "Transport ready"
        );

        Ok(Self::with_parts(
            config,
            default_collectors(),
            Arc::new(transport),
        )?)
    }

    /// Builds an agent around caller-supplied collectors and transport.
    pub fn with_parts(
        config: &AgentConfig,
        collectors: Vec<Box<dyn Collector>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let workers = config.workers()?;
        let store = Arc::new(MetricStore::new());
        let sampler = Sampler::new(
            collectors,
            Arc::clone(&store),
            tracing::info_span!("sampler"),
        );
        let dispatcher = BatchDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            workers,
            tracing::info_span!("dispatcher", workers = workers.get()),
        );
        Ok(Self {
            store,
            sampler,
            dispatcher,
            transport,
            poll_interval: config.poll_interval(),
            report_interval: config.report_interval(),
        })
    }

    /// Shared handle on the sampled metrics.
    pub fn store(&self) -> Arc<MetricStore> {
        Arc::clone(&self.store)
    }

    /// Runs both loops until `token` is cancelled, lets an in-flight dispatch
    /// cycle finish, then closes the transport.
    pub async fn run(self, token: CancellationToken) {
        let Agent {
            store,
            sampler,
            dispatcher,
            transport,
            poll_interval,
            report_interval,
        } = self;
        tracing::info!(
            workers = dispatcher.workers().get(),
            poll_interval_secs = poll_interval.as_secs(),
            report_interval_secs = report_interval.as_secs(),
            "Agent started"
        );
        tokio::join!(
            sampler.run(poll_interval, token.clone()),
            dispatcher.run(report_interval, token.clone()),
        );
        transport.close().await;
        tracing::info!(metrics = store.len(), "Agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_RATE_LIMIT;
    use crate::transport::TransportError;
    use metrix_collector::poll::PollCollector;
    use metrix_common::types::Metric;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        chunks: AtomicUsize,
        closed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn send_batch(&self, _chunk: &[Metric]) -> Result<(), TransportError> {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn bad_rate_limit_rejected_at_construction() {
        let config = AgentConfig {
            rate_limit: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            Agent::with_parts(&config, Vec::new(), Arc::new(CountingTransport::default())),
            Err(ConfigError::ZeroRateLimit)
        ));

        let config = AgentConfig {
            rate_limit: usize::MAX,
            ..AgentConfig::default()
        };
        assert!(matches!(
            Agent::with_parts(&config, Vec::new(), Arc::new(CountingTransport::default())),
            Err(ConfigError::RateLimitTooLarge { max: MAX_RATE_LIMIT })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_samples_dispatches_and_closes_transport() {
        let config = AgentConfig {
            rate_limit: 3,
            poll_interval_secs: 2,
            report_interval_secs: 10,
            ..AgentConfig::default()
        };
        let transport = Arc::new(CountingTransport::default());
        let agent = Agent::with_parts(
            &config,
            vec![Box::new(PollCollector::new())],
            transport.clone(),
        )
        .unwrap();
        assert_eq!(agent.dispatcher.workers().get(), 3);
        let store = agent.store();

        let token = CancellationToken::new();
        let stop = async {
            tokio::time::sleep(Duration::from_secs(11)).await;
            token.cancel();
        };
        tokio::join!(agent.run(token.clone()), stop);

        assert!(!store.is_empty());
        assert!(store.get("PollCount").is_some());
        assert!(transport.chunks.load(Ordering::SeqCst) >= 1);
        assert!(transport.closed.load(Ordering::SeqCst));
    }
}
