//! Cache instances and the prefetch-policy wrapper around them.

pub mod lru;

use crate::config::{CacheKind, CacheParams, ConfigError, PrefetchPolicy};
use crate::predictor::{Link, PredictorError};
use crate::request::Request;
use lru::LruStore;
use stats::Response;
use std::sync::Mutex;
use std::time::Instant;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("request size {size} is not a multiple of block_size {block_size}")]
    MisalignedSize { size: u64, block_size: u64 },
    #[error("request address {addr} is not a multiple of block_size {block_size}")]
    MisalignedAddr { addr: u64, block_size: u64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
}

/// One cache instance: a block store behind a prefetch policy.
///
/// Reads feed the predictor and, depending on the policy, chase its
/// associations through the `on_prediction` callback. The store lock is not
/// held while the callback runs, so a prediction may re-enter this same
/// instance through an inline prefetch.
pub struct CacheUnit {
    store: Mutex<LruStore>,
    predictor: Option<Link>,
    policy: PrefetchPolicy,
}

impl CacheUnit {
    /// A missing predictor link forces [`PrefetchPolicy::Never`].
    pub fn new(
        kind: CacheKind,
        policy: PrefetchPolicy,
        params: &CacheParams,
        predictor: Option<Link>,
    ) -> Result<Self, ConfigError> {
        let policy = if predictor.is_none() && policy != PrefetchPolicy::Never {
            log::warn!("no predictor link, forcing prefetch policy Never");
            PrefetchPolicy::Never
        } else {
            policy
        };
        let store = match kind {
            CacheKind::Lru => LruStore::new(params)?,
        };
        Ok(Self {
            store: Mutex::new(store),
            predictor,
            policy,
        })
    }

    /// Read through the store, then consult the predictor per policy. The
    /// time spent on prediction is reported as the response latency.
    pub fn read(
        &self,
        request: &Request,
        on_prediction: impl Fn(&Request),
    ) -> Result<Response, CacheError> {
        let mut response = self.store.lock().unwrap().read(request)?;

        let start = Instant::now();
        if self.policy != PrefetchPolicy::Never {
            if let Some(link) = &self.predictor {
                link.compute(*request, 0)?;
                if self.policy == PrefetchPolicy::Always
                    || (self.policy == PrefetchPolicy::OnMiss && response.misses != 0)
                {
                    for predicted in link.associated_requests(request, 0.0) {
                        on_prediction(&predicted);
                    }
                }
            }
        }
        response.latency_micros = start.elapsed().as_micros() as u32;

        Ok(response)
    }

    pub fn write(&self, request: &Request) -> Result<Response, CacheError> {
        Ok(self.store.lock().unwrap().write(request)?)
    }

    pub fn prefetch(&self, request: &Request) -> Result<Response, CacheError> {
        Ok(self.store.lock().unwrap().prefetch(request)?)
    }
}
