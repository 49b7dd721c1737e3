use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} {value} must be a power of two")]
    NotPowerOfTwo { name: &'static str, value: u64 },
    #[error("cache_size {cache_size} is not a multiple of page_size {page_size}")]
    CachePageMismatch { cache_size: u64, page_size: u64 },
    #[error("cache_size {cache_size} is not a multiple of block_size {block_size}")]
    CacheBlockMismatch { cache_size: u64, block_size: u64 },
    #[error("page_size {page_size} is not a multiple of block_size {block_size}")]
    PageBlockMismatch { page_size: u64, block_size: u64 },
    #[error("cache_size {cache_size} holds less than one page of {page_size} bytes")]
    CacheTooSmall { cache_size: u64, page_size: u64 },
    #[error("predictor table '{name}' must have at least one row")]
    EmptyTable { name: &'static str },
    #[error("pf_list_size must be at least one")]
    EmptyAssociationList,
    #[error("min_support {min_support} must be in 1..=max_support ({max_support})")]
    SupportRange {
        min_support: usize,
        max_support: usize,
    },
}

/// Geometry of one cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheParams {
    pub cache_size: u64,
    pub page_size: u64,
    pub block_size: u64,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            cache_size: 200 * 1024 * 1024,
            page_size: 64 * 1024,
            block_size: 512,
        }
    }
}

impl CacheParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("cache_size", self.cache_size),
            ("page_size", self.page_size),
            ("block_size", self.block_size),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { name, value });
            }
        }
        if self.cache_size % self.page_size != 0 {
            return Err(ConfigError::CachePageMismatch {
                cache_size: self.cache_size,
                page_size: self.page_size,
            });
        }
        if self.cache_size % self.block_size != 0 {
            return Err(ConfigError::CacheBlockMismatch {
                cache_size: self.cache_size,
                block_size: self.block_size,
            });
        }
        if self.page_size % self.block_size != 0 {
            return Err(ConfigError::PageBlockMismatch {
                page_size: self.page_size,
                block_size: self.block_size,
            });
        }
        if self.cache_size < self.page_size {
            return Err(ConfigError::CacheTooSmall {
                cache_size: self.cache_size,
                page_size: self.page_size,
            });
        }
        Ok(())
    }
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, strum::Display,
)]
pub enum CacheKind {
    #[default]
    Lru,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, strum::Display,
)]
pub enum PrefetchPolicy {
    /// No prediction is consulted.
    #[default]
    Never,
    /// Every read feeds the predictor and chases its associations.
    Always,
    /// Associations are chased only for reads with at least one miss.
    OnMiss,
}

/// How the tracked size of a re-observed request is updated.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, strum::Display,
)]
pub enum SizePolicy {
    ConstantByLimit,
    ConstantFirstValue,
    UpdateWithLatest,
    #[default]
    UpdateWithLargest,
    UpdateWithLargestWithLimit,
    UpdateWithSmallest,
}

impl SizePolicy {
    #[must_use]
    pub fn apply(self, old: u64, new: u64, limit: u64) -> u64 {
        match self {
            Self::ConstantByLimit => limit,
            Self::ConstantFirstValue => old,
            Self::UpdateWithLatest => new,
            Self::UpdateWithLargest => old.max(new),
            Self::UpdateWithLargestWithLimit => old.max(new).min(limit),
            Self::UpdateWithSmallest => old.min(new),
        }
    }
}

/// Reserved: only `DoubleCounter` has defined semantics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum TimestampKind {
    #[default]
    DoubleCounter,
    DoubleTime,
}

/// Reserved: only `OriginalPaper` has defined semantics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum AssociationMetric {
    #[default]
    OriginalPaper,
    Module,
    NormalizedModule,
    MinModule,
    Square,
    NormalizedSquare,
    MinSquare,
}

/// Reserved: the association-mining algorithm is the only one implemented.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum PredictorAlgo {
    #[default]
    Auto,
    Mithril,
    Lookahead,
}

/// Tuning knobs of the association-mining predictor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorParams {
    /// Maximum first-timestamp distance between candidate pairs, and the
    /// per-pair delta bound inside an association.
    pub lookahead_range: u64,
    /// Observation count above which an address is dropped as too frequent.
    pub max_support: usize,
    /// Observation count at which an address becomes eligible for mining.
    pub min_support: usize,
    /// Tolerated count of out-of-range timestamp deltas per pair.
    pub confidence: usize,
    /// Bound on the association list of a single source request.
    pub pf_list_size: usize,
    pub mining_table_num_rows: usize,
    pub prefetch_table_num_rows: usize,
    pub record_table_num_rows: usize,
    pub req_size_update_policy: SizePolicy,
    pub limit_size_for_size_policy: u64,
    /// 0 mines inline on the caller, 1 spawns a mining worker. Larger
    /// values are clamped to 1.
    pub thread_count: usize,

    // Accepted for configuration compatibility; not consumed by the
    // implemented mining path.
    pub ts_type: TimestampKind,
    pub associations_metric: AssociationMetric,
    pub is_priority_queue: bool,
    pub dfs: usize,
    pub algo: PredictorAlgo,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self::original_paper()
    }
}

impl PredictorParams {
    /// Parameters from the association-mining paper's evaluation setup.
    #[must_use]
    pub fn original_paper() -> Self {
        Self {
            lookahead_range: 20,
            max_support: 8,
            min_support: 2,
            confidence: 0,
            pf_list_size: 2,
            mining_table_num_rows: 2560,
            prefetch_table_num_rows: 30_000,
            record_table_num_rows: 20_000,
            req_size_update_policy: SizePolicy::UpdateWithLargest,
            limit_size_for_size_policy: 0,
            thread_count: 0,
            ts_type: TimestampKind::DoubleCounter,
            associations_metric: AssociationMetric::OriginalPaper,
            is_priority_queue: false,
            dfs: 1,
            algo: PredictorAlgo::Mithril,
        }
    }

    /// Small tables for exercising the full record/mine/notify cycle with a
    /// handful of requests.
    #[must_use]
    pub fn unit_test() -> Self {
        Self {
            lookahead_range: 3,
            max_support: 5,
            min_support: 2,
            confidence: 0,
            pf_list_size: 2,
            mining_table_num_rows: 3,
            prefetch_table_num_rows: 1000,
            record_table_num_rows: 2000,
            req_size_update_policy: SizePolicy::UpdateWithLargest,
            limit_size_for_size_policy: 512,
            thread_count: 0,
            ts_type: TimestampKind::DoubleCounter,
            associations_metric: AssociationMetric::OriginalPaper,
            is_priority_queue: false,
            dfs: 0,
            algo: PredictorAlgo::Auto,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rows) in [
            ("record_table", self.record_table_num_rows),
            ("mining_table", self.mining_table_num_rows),
            ("prefetch_table", self.prefetch_table_num_rows),
        ] {
            if rows == 0 {
                return Err(ConfigError::EmptyTable { name });
            }
        }
        if self.pf_list_size == 0 {
            return Err(ConfigError::EmptyAssociationList);
        }
        if self.min_support == 0 || self.min_support > self.max_support {
            return Err(ConfigError::SupportRange {
                min_support: self.min_support,
                max_support: self.max_support,
            });
        }
        Ok(())
    }
}
