//! Metrics agent: samples host statistics into a [`store::MetricStore`] and
//! periodically ships snapshots to a collector server.
//!
//! Two independent loops share the store. The [`sampler::Sampler`] writes
//! on every poll interval. The [`dispatcher::BatchDispatcher`] takes a
//! snapshot on every report interval, splits it into at most `rate_limit`
//! chunks with [`partition::partition`] and hands the chunks to a fixed pool
//! of workers, each sending through a [`transport::Transport`].

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod partition;
pub mod sampler;
pub mod store;
pub mod transport;
