use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counters returned by a single cache operation.
///
/// Hits and misses are counted per block, prefetched and evicted-unused
/// per inserted or dropped block.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub hits: u32,
    pub misses: u32,
    pub prefetched: u32,
    pub evicted_unused: u32,
    pub latency_micros: u32,
    pub internal_requests: u32,
}

impl std::ops::AddAssign for Response {
    fn add_assign(&mut self, other: Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.prefetched += other.prefetched;
        self.evicted_unused += other.evicted_unused;
        self.latency_micros += other.latency_micros;
        self.internal_requests += other.internal_requests;
    }
}

/// Aggregate over a whole trace run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of responses folded in.
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub prefetched: u64,
    pub evicted_unused: u64,
    pub internal_requests: u64,
}

impl std::ops::AddAssign<Response> for Summary {
    fn add_assign(&mut self, response: Response) {
        self.requests += 1;
        self.hits += u64::from(response.hits);
        self.misses += u64::from(response.misses);
        self.prefetched += u64::from(response.prefetched);
        self.evicted_unused += u64::from(response.evicted_unused);
        self.internal_requests += u64::from(response.internal_requests);
    }
}

impl Summary {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit ratio in percent over all accounted blocks.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.hits as f64 / self.total() as f64 * 100.0
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "num requests {}, hits {}, misses {}, total {}, ratio (in %) {:.2}",
            self.requests + self.internal_requests,
            self.hits,
            self.misses,
            self.total(),
            self.hit_ratio(),
        )
    }
}

/// Histogram of per-request prediction latencies.
///
/// Buckets widen with magnitude: exact up to 10us, then 10us, 100us and
/// 1ms granularity.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyHistogram(BTreeMap<u32, u64>);

impl LatencyHistogram {
    pub fn record(&mut self, micros: u32) {
        *self.0.entry(Self::bucket(micros)).or_insert(0) += 1;
    }

    #[must_use]
    pub fn bucket(micros: u32) -> u32 {
        if micros > 1000 {
            micros - micros % 1000
        } else if micros > 100 {
            micros - micros % 100
        } else if micros > 10 {
            micros - micros % 10
        } else {
            micros
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.0.iter().map(|(&bucket, &count)| (bucket, count))
    }
}

impl std::fmt::Display for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "Latency (usec : occurrences)")?;
        for (bucket, count) in self.iter() {
            writeln!(f, "{bucket} : {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LatencyHistogram, Response, Summary};

    #[test]
    fn summary_accumulates_responses() {
        let mut summary = Summary::default();
        summary += Response {
            hits: 2,
            misses: 2,
            ..Response::default()
        };
        summary += Response {
            hits: 4,
            misses: 0,
            prefetched: 2,
            ..Response::default()
        };
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.total(), 8);
        assert_eq!(summary.prefetched, 2);
        assert!((summary.hit_ratio() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn hit_ratio_of_empty_summary_is_zero() {
        assert_eq!(Summary::default().hit_ratio(), 0.0);
    }

    #[test]
    fn latency_buckets_round_down_by_magnitude() {
        assert_eq!(LatencyHistogram::bucket(7), 7);
        assert_eq!(LatencyHistogram::bucket(10), 10);
        assert_eq!(LatencyHistogram::bucket(87), 80);
        assert_eq!(LatencyHistogram::bucket(100), 100);
        assert_eq!(LatencyHistogram::bucket(870), 800);
        assert_eq!(LatencyHistogram::bucket(1000), 1000);
        assert_eq!(LatencyHistogram::bucket(12_345), 12_000);
    }

    #[test]
    fn histogram_counts_per_bucket() {
        let mut hist = LatencyHistogram::default();
        hist.record(82);
        hist.record(87);
        hist.record(5);
        let buckets: Vec<_> = hist.iter().collect();
        assert_eq!(buckets, vec![(5, 1), (80, 2)]);
    }
}
