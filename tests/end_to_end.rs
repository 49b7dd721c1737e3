//! Whole-pipeline scenarios: trace requests through the sharded cache,
//! the LRU store and the predictor together.

use blockcachesim::testing::init_test;
use blockcachesim::{
    CacheKind, CacheParams, CacheUnit, Predictor, PredictorParams, PrefetchPolicy, Request,
    ShardedCache,
};

fn params(cache: u64, page: u64, block: u64) -> CacheParams {
    CacheParams {
        cache_size: cache,
        page_size: page,
        block_size: block,
    }
}

fn discovery_params() -> PredictorParams {
    PredictorParams {
        mining_table_num_rows: 2,
        ..PredictorParams::unit_test()
    }
}

/// Predictor fed the address sequence `[A, B, A, B]` so the published
/// query table maps A to [B].
fn seeded_predictor() -> Predictor {
    let predictor = Predictor::new(discovery_params()).unwrap();
    let link = predictor.link();
    for addr in [0u64, 512, 0, 512] {
        link.compute(Request::read(addr, 512), 0).unwrap();
    }
    predictor
}

#[test]
fn no_prefetch_hit_miss_accounting() {
    init_test();
    let cache = CacheUnit::new(
        CacheKind::Lru,
        PrefetchPolicy::Never,
        &params(4096, 1024, 512),
        None,
    )
    .unwrap();

    let first = cache.read(&Request::read(0, 1024), |_| {}).unwrap();
    assert_eq!((first.hits, first.misses), (0, 2));
    let second = cache.read(&Request::read(1024, 1024), |_| {}).unwrap();
    assert_eq!((second.hits, second.misses), (0, 2));
    let repeat = cache.read(&Request::read(0, 1024), |_| {}).unwrap();
    assert_eq!((repeat.hits, repeat.misses), (2, 0));

    for response in [first, second, repeat] {
        assert_eq!(response.prefetched, 0);
        assert_eq!(response.evicted_unused, 0);
    }
}

#[test]
fn association_discovery_publishes_follower() {
    init_test();
    let predictor = Predictor::new(discovery_params()).unwrap();
    let link = predictor.link();
    for addr in [0u64, 512, 0, 512, 1024] {
        link.compute(Request::read(addr, 512), 0).unwrap();
    }
    let associated = link.associated_requests(&Request::read(0, 512), 0.0);
    assert_eq!(associated.len(), 1);
    assert_eq!(associated[0].addr, 512);
}

#[test]
fn sharded_dispatch_splits_across_two_shards() {
    init_test();
    let cache = ShardedCache::new(
        CacheKind::Lru,
        PrefetchPolicy::Never,
        2,
        2048,
        &params(4096, 1024, 512),
        &PredictorParams::unit_test(),
        false,
    )
    .unwrap();

    // {addr=1024, size=2048} -> {1024,1024} on shard 0, {2048,1024} on shard 1
    let futures = cache.process(&Request::read(1024, 2048));
    assert_eq!(futures.len(), 2);
    let mut total_blocks = 0;
    for future in futures {
        let response = future.wait().unwrap();
        assert_eq!(response.misses, 2);
        total_blocks += response.misses;
    }
    assert_eq!(total_blocks, 4);
}

#[test]
fn prefetch_on_miss_turns_the_follower_into_a_hit() {
    init_test();
    let predictor = seeded_predictor();
    let cache = CacheUnit::new(
        CacheKind::Lru,
        PrefetchPolicy::OnMiss,
        &params(4096, 1024, 512),
        Some(predictor.link()),
    )
    .unwrap();

    let b = Request::read(512, 512);
    let first = cache
        .read(&Request::read(0, 512), |predicted| {
            cache.prefetch(predicted).unwrap();
        })
        .unwrap();
    assert!(first.misses > 0, "first read of A must miss");

    let follower = cache.read(&b, |_| {}).unwrap();
    assert_eq!((follower.hits, follower.misses), (1, 0));
}

#[test]
fn eviction_unused_counts_blocks_of_the_dropped_page() {
    init_test();
    // cache holds exactly one page of two blocks
    let cache = CacheUnit::new(
        CacheKind::Lru,
        PrefetchPolicy::Never,
        &params(1024, 1024, 512),
        None,
    )
    .unwrap();

    let prefetched = cache.prefetch(&Request::read(0, 1024)).unwrap();
    assert_eq!(prefetched.prefetched, 2);

    let evicting = cache.read(&Request::read(1024, 1024), |_| {}).unwrap();
    assert_eq!(evicting.evicted_unused, 2);
}

#[test]
fn always_policy_prefetches_through_the_sharded_cache() {
    init_test();
    let cache = ShardedCache::new(
        CacheKind::Lru,
        PrefetchPolicy::Always,
        0,
        2048,
        &params(4096, 512, 512),
        &discovery_params(),
        false,
    )
    .unwrap();

    let a = Request::read(0, 512);
    let b = Request::read(512, 512);
    for request in [a, b, a, b] {
        for future in cache.process(&request) {
            future.wait().unwrap();
        }
    }
    // the next read of A dispatches a prefetch of B; its future arrives
    // through the same dispatch
    let futures = cache.process(&a);
    assert_eq!(futures.len(), 2);
    let mut responses = Vec::new();
    for future in futures {
        responses.push(future.wait().unwrap());
    }
    // A itself hits, the prefetched B was already resident: no new blocks
    assert_eq!(responses.iter().map(|r| r.misses).sum::<u32>(), 0);
    assert_eq!(responses.iter().map(|r| r.prefetched).sum::<u32>(), 0);
}

#[test]
fn threaded_shards_account_the_same_totals() {
    init_test();
    let cache = ShardedCache::new(
        CacheKind::Lru,
        PrefetchPolicy::Never,
        4,
        2048,
        &params(16 * 1024, 1024, 512),
        &PredictorParams::unit_test(),
        false,
    )
    .unwrap();

    let mut misses = 0;
    let mut hits = 0;
    // pass over 16 KiB twice: all misses, then all hits
    for pass in 0..2 {
        for chunk in 0..4u64 {
            for future in cache.process(&Request::read(chunk * 4096, 4096)) {
                let response = future.wait().unwrap();
                misses += response.misses;
                hits += response.hits;
            }
        }
        if pass == 0 {
            assert_eq!(misses, 32);
            assert_eq!(hits, 0);
        }
    }
    assert_eq!(hits, 32);
    assert_eq!(misses, 32);
}

#[test]
fn threaded_predictor_feeds_sharded_reads() {
    init_test();
    let predictor_params = PredictorParams {
        thread_count: 1,
        ..discovery_params()
    };
    let cache = ShardedCache::new(
        CacheKind::Lru,
        PrefetchPolicy::OnMiss,
        2,
        2048,
        &params(4096, 512, 512),
        &predictor_params,
        false,
    )
    .unwrap();

    // drive reads through both shards; totals stay consistent even though
    // mining runs asynchronously
    let mut blocks = 0;
    for round in 0..8u64 {
        for future in cache.process(&Request::read((round % 4) * 512, 512)) {
            let response = future.wait().unwrap();
            blocks += response.hits + response.misses;
        }
    }
    assert_eq!(blocks, 8);
}
