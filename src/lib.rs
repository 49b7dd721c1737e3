//! Block-level cache simulator with an association-mining prefetch
//! predictor.
//!
//! Trace requests flow through a [`sharded::ShardedCache`], which splits them
//! on shard boundaries onto per-shard LRU caches. Each read feeds the shared
//! [`predictor::Predictor`]; mined associations come back as prefetch hints
//! that are dispatched alongside the demand traffic.

pub mod cache;
pub mod config;
pub mod predictor;
pub mod request;
pub mod ring;
pub mod sharded;
pub mod testing;
pub mod worker;

/// Byte address into the flat simulated storage.
#[allow(non_camel_case_types)]
pub type address = u64;

pub use cache::{CacheError, CacheUnit, RequestError};
pub use config::{
    CacheKind, CacheParams, ConfigError, PredictorParams, PrefetchPolicy, SizePolicy,
};
pub use predictor::{Link, NotifyFn, Predictor, PredictorError};
pub use request::{Op, Request};
pub use sharded::{CacheResult, ShardedCache};
pub use stats::{LatencyHistogram, Response, Summary};
