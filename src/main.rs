use blockcachesim::worker::TaskFuture;
use blockcachesim::{
    CacheError, CacheKind, CacheParams, CacheResult, PredictorParams, PrefetchPolicy, Request,
    ShardedCache, SizePolicy,
};
use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use stats::{LatencyHistogram, Summary};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(about = "Replay a block trace against a sharded cache with prefetching")]
struct Options {
    /// Path to trace data
    #[arg(short = 'I', long)]
    input: PathBuf,

    /// Cache size in bytes
    #[arg(short = 'C', long, default_value_t = 200 * 1024 * 1024)]
    cache: u64,

    /// Page size in bytes
    #[arg(short = 'P', long, default_value_t = 64 * 1024)]
    page: u64,

    /// Block size in bytes
    #[arg(short = 'B', long, default_value_t = 512)]
    block: u64,

    /// Number of shards (zero means sharding is off)
    #[arg(short = 'N', long, default_value_t = 0)]
    shards: usize,

    /// Shard size in bytes
    #[arg(long, default_value_t = 2 * 1024 * 1024)]
    shard_size: u64,

    /// Number of requests to process
    #[arg(short = 'R', long)]
    requests: Option<u64>,

    /// Number of requests to skip
    #[arg(short = 'S', long, default_value_t = 0)]
    skip: u64,

    /// Cache eviction policy
    #[arg(long, value_enum, default_value_t = CacheKind::Lru)]
    cache_type: CacheKind,

    /// Prefetch policy
    #[arg(long, value_enum, default_value_t = PrefetchPolicy::Never)]
    prefetch: PrefetchPolicy,

    #[arg(long)]
    lookahead_range: Option<u64>,
    #[arg(long)]
    max_support: Option<usize>,
    #[arg(long)]
    min_support: Option<usize>,
    #[arg(long)]
    confidence: Option<usize>,
    #[arg(long)]
    pf_list_size: Option<usize>,
    #[arg(long)]
    mtable_size: Option<usize>,
    #[arg(long)]
    rtable_size: Option<usize>,
    #[arg(long)]
    ptable_size: Option<usize>,
    #[arg(long, value_enum)]
    size_policy: Option<SizePolicy>,
    #[arg(long)]
    size_limit: Option<u64>,
    #[arg(long)]
    threads: Option<usize>,

    /// Max depth of the in-flight response queue
    #[arg(long, default_value_t = 0)]
    queue: usize,

    /// Build a predictor latency histogram
    #[arg(long)]
    latency: bool,

    /// Preload the input trace into memory
    #[arg(long)]
    preload_trace: bool,

    /// Create a predictor instance per shard
    #[arg(long)]
    sharded_predictor: bool,

    /// Write the aggregate summary as JSON
    #[arg(long)]
    stats_out: Option<PathBuf>,
}

impl Options {
    fn cache_params(&self) -> CacheParams {
        CacheParams {
            cache_size: self.cache,
            page_size: self.page,
            block_size: self.block,
        }
    }

    fn predictor_params(&self) -> PredictorParams {
        let mut params = PredictorParams::original_paper();
        if let Some(v) = self.lookahead_range {
            params.lookahead_range = v;
        }
        if let Some(v) = self.max_support {
            params.max_support = v;
        }
        if let Some(v) = self.min_support {
            params.min_support = v;
        }
        if let Some(v) = self.confidence {
            params.confidence = v;
        }
        if let Some(v) = self.pf_list_size {
            params.pf_list_size = v;
        }
        if let Some(v) = self.mtable_size {
            params.mining_table_num_rows = v;
        }
        if let Some(v) = self.rtable_size {
            params.record_table_num_rows = v;
        }
        if let Some(v) = self.ptable_size {
            params.prefetch_table_num_rows = v;
        }
        if let Some(v) = self.size_policy {
            params.req_size_update_policy = v;
        }
        if let Some(v) = self.size_limit {
            params.limit_size_for_size_policy = v;
        }
        if let Some(v) = self.threads {
            params.thread_count = v;
        }
        if self.sharded_predictor && self.shards > 0 {
            params.mining_table_num_rows /= self.shards;
            params.prefetch_table_num_rows /= self.shards;
            params.record_table_num_rows /= self.shards;
        }
        params
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();
    let options = Options::parse();

    let cache_params = options.cache_params();
    let predictor_params = options.predictor_params();

    println!("Cache type : {}", options.cache_type);
    println!("Cache size : {}", cache_params.cache_size);
    println!("Page size : {}", cache_params.page_size);
    println!("Block size : {}", cache_params.block_size);
    println!("Num shards : {}", options.shards);
    println!("Shard size : {}", options.shard_size);
    println!("Prefetch policy : {}", options.prefetch);
    if options.prefetch != PrefetchPolicy::Never {
        println!("lookahead_range : {}", predictor_params.lookahead_range);
        println!("max_support : {}", predictor_params.max_support);
        println!("min_support : {}", predictor_params.min_support);
        println!("confidence : {}", predictor_params.confidence);
        println!("pf_list_size : {}", predictor_params.pf_list_size);
        println!(
            "mining_table_num_rows : {}",
            predictor_params.mining_table_num_rows
        );
        println!(
            "prefetch_table_num_rows : {}",
            predictor_params.prefetch_table_num_rows
        );
        println!(
            "record_table_num_rows : {}",
            predictor_params.record_table_num_rows
        );
        println!(
            "req_size_update_policy : {}",
            predictor_params.req_size_update_policy
        );
        println!("thread_count : {}", predictor_params.thread_count);
    }

    let cache = ShardedCache::new(
        options.cache_type,
        options.prefetch,
        options.shards,
        options.shard_size,
        &cache_params,
        &predictor_params,
        options.sharded_predictor,
    )
    .wrap_err("initialization failed")?;

    let reader = trace::TraceReader::open(&options.input, options.skip, options.requests)
        .wrap_err("failed to open trace")?;

    // bound the number of in-flight responses so the shard queues cannot
    // run arbitrarily far ahead of aggregation
    let depth = if options.queue > 0 {
        options.queue
    } else {
        options.shards.max(1)
    };
    let (sender, receiver) = crossbeam_channel::bounded::<TaskFuture<CacheResult>>(depth);

    let want_latency = options.latency;
    type Aggregate = Result<(Summary, LatencyHistogram), CacheError>;
    let aggregator = std::thread::spawn(move || -> Aggregate {
        let mut summary = Summary::default();
        let mut histogram = LatencyHistogram::default();
        for future in receiver {
            let response = future.wait()?;
            summary += response;
            if want_latency {
                histogram.record(response.latency_micros);
            }
        }
        Ok((summary, histogram))
    });

    let start = Instant::now();
    // a closed channel means the aggregator hit a failed request; stop
    // submitting and let join surface the error
    let submit = |request: Request| -> bool {
        cache
            .process(&request)
            .into_iter()
            .all(|future| sender.send(future).is_ok())
    };
    if options.preload_trace {
        for access in reader.preload()? {
            if !submit(Request::from(access)) {
                break;
            }
        }
    } else {
        for access in reader {
            if !submit(Request::from(access?)) {
                break;
            }
        }
    }
    drop(submit);
    drop(sender);

    let (summary, histogram) = aggregator
        .join()
        .expect("aggregator panicked")
        .wrap_err("request failed")?;
    let elapsed = start.elapsed();

    println!("\nResults:");
    println!("{summary}");
    println!(
        "num prefetched {}, evicted untouched {}",
        summary.prefetched, summary.evicted_unused
    );
    println!("Time elapsed: {} ms", elapsed.as_millis());
    if options.latency {
        print!("{histogram}");
    }

    if let Some(path) = &options.stats_out {
        let file = std::fs::File::create(path)
            .wrap_err_with(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &summary)?;
        log::info!("summary written to {}", path.display());
    }

    Ok(())
}
