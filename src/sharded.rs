//! Hash-free address-range sharding of a cache across worker threads.
//!
//! A request is split on shard boundaries; each sub-request is submitted to
//! the worker owning its shard and the caller receives one future per
//! sub-request. Prefetches triggered by predictions dispatch recursively and
//! park their futures in a spillover buffer that is drained into the next
//! dispatch's result, so prefetch outcomes surface to the trace loop without
//! anyone blocking on them.

use crate::cache::{CacheError, CacheUnit};
use crate::config::{CacheKind, CacheParams, ConfigError, PredictorParams, PrefetchPolicy};
use crate::predictor::{Link, Predictor};
use crate::request::Request;
use crate::worker::{TaskFuture, Worker};
use stats::Response;
use std::sync::{Arc, Mutex};

pub type CacheResult = Result<Response, CacheError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardOp {
    Read,
    Prefetch,
}

struct Inner {
    caches: Vec<CacheUnit>,
    workers: Vec<Worker>,
    num_shards: usize,
    shard_size: u64,
    blocks_per_shard: u64,
    block_size: u64,
    /// Futures of prefetches issued as read side-effects, merged into the
    /// next dispatch's returned vector.
    spillover: Mutex<Vec<TaskFuture<CacheResult>>>,
}

/// Cache front splitting requests across `num_shards` per-shard cache
/// instances, each served by a dedicated worker. With zero shards a single
/// unsharded cache runs inline on the caller.
pub struct ShardedCache {
    inner: Arc<Inner>,
    /// Keeps predictors (and their mining workers) alive for the links the
    /// shard caches hold.
    _predictors: Vec<Predictor>,
}

impl ShardedCache {
    pub fn new(
        kind: CacheKind,
        policy: PrefetchPolicy,
        num_shards: usize,
        shard_size: u64,
        cache_params: &CacheParams,
        predictor_params: &PredictorParams,
        sharded_predictor: bool,
    ) -> Result<Self, ConfigError> {
        cache_params.validate()?;
        let count = num_shards.max(1);

        let mut per_shard = *cache_params;
        if num_shards > 0 {
            per_shard.cache_size = cache_params.cache_size / num_shards as u64;
        }

        let mut predictors = Vec::new();
        let links: Vec<Option<Link>> = if policy == PrefetchPolicy::Never {
            vec![None; count]
        } else if sharded_predictor {
            (0..count)
                .map(|_| {
                    let predictor = Predictor::new(predictor_params.clone())?;
                    let link = predictor.link();
                    predictors.push(predictor);
                    Ok(Some(link))
                })
                .collect::<Result<_, ConfigError>>()?
        } else {
            let predictor = Predictor::new(predictor_params.clone())?;
            let links = (0..count).map(|_| Some(predictor.link())).collect();
            predictors.push(predictor);
            links
        };

        let caches = links
            .into_iter()
            .map(|link| CacheUnit::new(kind, policy, &per_shard, link))
            .collect::<Result<Vec<_>, _>>()?;
        let workers = (0..num_shards).map(|_| Worker::spawn()).collect();

        log::info!(
            "sharded cache: {num_shards} shards of {shard_size} bytes, {} bytes per shard cache",
            per_shard.cache_size,
        );
        Ok(Self {
            inner: Arc::new(Inner {
                caches,
                workers,
                num_shards,
                shard_size,
                blocks_per_shard: shard_size / cache_params.block_size,
                block_size: cache_params.block_size,
                spillover: Mutex::new(Vec::new()),
            }),
            _predictors: predictors,
        })
    }

    /// Process one trace request, returning a future per dispatched
    /// sub-request plus any prefetch futures spilled over since the last
    /// call.
    pub fn process(&self, request: &Request) -> Vec<TaskFuture<CacheResult>> {
        dispatch(&self.inner, request, ShardOp::Read, false)
    }
}

impl Drop for ShardedCache {
    fn drop(&mut self) {
        // run out every worker, then drop whatever late prefetch tasks and
        // spilled futures remain so queued jobs release their state
        for worker in &self.inner.workers {
            worker.stop();
        }
        for worker in &self.inner.workers {
            worker.clear_pending();
        }
        self.inner.spillover.lock().unwrap().clear();
    }
}

/// Run one sub-request against shard `idx`, wiring read predictions into a
/// front-of-queue prefetch dispatch.
fn run(inner: &Arc<Inner>, op: ShardOp, idx: usize, request: &Request) -> CacheResult {
    match op {
        ShardOp::Read => {
            let spill = Arc::clone(inner);
            inner.caches[idx].read(request, move |predicted| {
                let futures = dispatch(&spill, predicted, ShardOp::Prefetch, true);
                spill.spillover.lock().unwrap().extend(futures);
            })
        }
        ShardOp::Prefetch => inner.caches[idx].prefetch(request),
    }
}

fn dispatch(
    inner: &Arc<Inner>,
    request: &Request,
    op: ShardOp,
    to_front: bool,
) -> Vec<TaskFuture<CacheResult>> {
    let mut futures = Vec::new();

    if inner.num_shards == 0 {
        futures.push(TaskFuture::ready(run(inner, op, 0, request)));
    } else {
        let mut shard_idx = (request.addr / inner.shard_size) as usize;
        let mut first = request.addr / inner.block_size;
        let last = first + request.size / inner.block_size;

        while first < last {
            let shard_first = shard_idx as u64 * inner.blocks_per_shard;
            let shard_last = shard_first + inner.blocks_per_shard;
            let start_in_shard = first - shard_first;
            let end_in_shard = if shard_first < last && last < shard_last {
                last - shard_first
            } else {
                inner.blocks_per_shard
            };
            let blocks = end_in_shard - start_in_shard;

            let sub = Request::new(
                first * inner.block_size,
                blocks * inner.block_size,
                request.time,
                request.op,
            );
            let idx = shard_idx % inner.num_shards;
            log::trace!("dispatch {} to shard {idx}", console::style(sub).yellow());
            let task_inner = Arc::clone(inner);
            futures.push(
                inner.workers[idx].add_task(to_front, move || run(&task_inner, op, idx, &sub)),
            );

            first += blocks;
            shard_idx += 1;
        }
    }

    let mut spillover = inner.spillover.lock().unwrap();
    futures.extend(spillover.drain(..));
    futures
}

#[cfg(test)]
mod tests {
    use super::ShardedCache;
    use crate::config::{CacheKind, CacheParams, PredictorParams, PrefetchPolicy};
    use crate::request::Request;
    use crate::testing::init_test;

    fn cache_params() -> CacheParams {
        CacheParams {
            cache_size: 4096,
            page_size: 1024,
            block_size: 512,
        }
    }

    fn never(num_shards: usize, shard_size: u64) -> ShardedCache {
        ShardedCache::new(
            CacheKind::Lru,
            PrefetchPolicy::Never,
            num_shards,
            shard_size,
            &cache_params(),
            &PredictorParams::unit_test(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn zero_shards_runs_inline_with_one_future() {
        init_test();
        let cache = never(0, 2048);
        let futures = cache.process(&Request::read(0, 1024));
        assert_eq!(futures.len(), 1);
        let response = futures.into_iter().next().unwrap().wait().unwrap();
        assert_eq!((response.hits, response.misses), (0, 2));
    }

    #[test]
    fn requests_split_on_shard_boundaries() {
        init_test();
        let cache = never(2, 2048);
        // blocks 2..6 span shard 0 (blocks 0..4) and shard 1 (blocks 4..8)
        let futures = cache.process(&Request::read(1024, 2048));
        assert_eq!(futures.len(), 2);
        let mut blocks = 0;
        for future in futures {
            let response = future.wait().unwrap();
            assert_eq!(response.hits, 0);
            assert_eq!(response.misses, 2, "each shard sees one half");
            blocks += response.misses;
        }
        assert_eq!(blocks, 4, "sub-requests cover the request exactly");
    }

    #[test]
    fn single_shard_request_yields_single_future() {
        init_test();
        let cache = never(2, 2048);
        let futures = cache.process(&Request::read(2048, 1024));
        assert_eq!(futures.len(), 1);
        assert_eq!(futures.into_iter().next().unwrap().wait().unwrap().misses, 2);
    }

    #[test]
    fn repeated_reads_hit_across_shards() {
        init_test();
        let cache = never(2, 2048);
        for future in cache.process(&Request::read(1024, 2048)) {
            future.wait().unwrap();
        }
        let mut hits = 0;
        for future in cache.process(&Request::read(1024, 2048)) {
            hits += future.wait().unwrap().hits;
        }
        assert_eq!(hits, 4);
    }

    #[test]
    fn sharded_dispatch_rounds_to_block_boundaries() {
        init_test();
        let cache = never(2, 2048);
        // 100 bytes round down to zero blocks: nothing dispatched
        let futures = cache.process(&Request::read(0, 100));
        assert!(futures.is_empty());
        // a misaligned start is snapped to its block
        let futures = cache.process(&Request::read(100, 512));
        assert_eq!(futures.into_iter().next().unwrap().wait().unwrap().misses, 1);
    }

    #[test]
    fn misaligned_request_fails_inline() {
        init_test();
        let cache = never(0, 2048);
        let futures = cache.process(&Request::read(100, 512));
        assert!(futures.into_iter().next().unwrap().wait().is_err());
    }

    #[test]
    fn prefetch_futures_spill_into_later_dispatches() {
        init_test();
        let params = CacheParams {
            cache_size: 2048,
            page_size: 512,
            block_size: 512,
        };
        let cache = ShardedCache::new(
            CacheKind::Lru,
            PrefetchPolicy::Always,
            0,
            2048,
            &params,
            &PredictorParams {
                mining_table_num_rows: 2,
                ..PredictorParams::unit_test()
            },
            false,
        )
        .unwrap();

        // teach the predictor that 0 is followed by 512
        let a = Request::read(0, 512);
        let b = Request::read(512, 512);
        let mut futures = Vec::new();
        for r in [a, b, a, b] {
            futures.extend(cache.process(&r));
        }
        // the fifth read of A prefetches B; inline mode spills the prefetch
        // future into the same dispatch's result
        let with_prefetch = cache.process(&a);
        assert!(with_prefetch.len() >= 2);
        let mut prefetched = 0;
        for future in futures.into_iter().chain(with_prefetch) {
            prefetched += future.wait().unwrap().prefetched;
        }
        assert_eq!(prefetched, 0, "predicted block was already cached");
    }

    #[test]
    fn sharded_predictor_builds_one_instance_per_shard() {
        init_test();
        let cache = ShardedCache::new(
            CacheKind::Lru,
            PrefetchPolicy::OnMiss,
            2,
            2048,
            &cache_params(),
            &PredictorParams::unit_test(),
            true,
        )
        .unwrap();
        assert_eq!(cache._predictors.len(), 2);
        for future in cache.process(&Request::read(1024, 2048)) {
            future.wait().unwrap();
        }
    }
}
