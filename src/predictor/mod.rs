//! Association-mining access predictor.
//!
//! Incoming requests are recorded into a bounded table; once enough
//! addresses have crossed the support threshold a mining pass turns their
//! temporal co-occurrence into predictions, notifies registered callbacks
//! and publishes the result into the query table. Mining runs inline on the
//! recording caller (`thread_count == 0`) or on one dedicated worker
//! (`thread_count == 1`).

pub mod prefetch;
pub mod record;

use crate::config::{ConfigError, PredictorParams};
use crate::request::Request;
use self::prefetch::PrefetchTable;
use self::record::RecordTable;
use console::style;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread;

/// Invoked once per mined source with its association list. The returned
/// status is the consumer's business and is not interpreted here.
pub type NotifyFn = Box<dyn FnMut(&Request, &[Request]) -> i32 + Send>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictorError {
    /// A prediction backend refused the request.
    #[error("prediction backend failed with status {0}")]
    Backend(i32),
}

/// Mining worker phases, for trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
enum Phase {
    Swapping,
    Mining,
    Notifying,
    Merging,
    Idle,
    Exiting,
}

/// Wake-up handshake between recording and the mining worker. `rows` mirrors
/// the mining table capacity; zero is the shutdown sentinel.
struct Gate {
    rows: usize,
}

struct Shared {
    params: PredictorParams,
    /// Monotone reference counter stamped onto every recorded request.
    ts: AtomicU64,
    /// Active recording table. The mining worker swaps it with its spare
    /// buffer under this lock, so writers never observe a half-swapped table.
    recording: Mutex<RecordTable>,
    /// Predictions produced by the current mining pass.
    mined: Mutex<PrefetchTable>,
    /// Published predictions served to queries.
    query: RwLock<PrefetchTable>,
    callbacks: Mutex<HashMap<u64, NotifyFn>>,
    gate: Mutex<Gate>,
    available: Condvar,
}

impl Shared {
    fn ready_for_mining(&self, rows: usize) -> bool {
        self.recording.lock().unwrap().available() >= rows
    }

    /// Record one request under the compute lock and trigger or signal a
    /// mining pass when the mining set is full.
    fn record(&self, request: Request) {
        let mut recording = self.recording.lock().unwrap();
        // loaded under the lock so per-address stamps append in order
        let ts = self.ts.load(Ordering::Relaxed) as i64;
        recording.insert(request, ts, &self.params);

        let available = recording.available();
        if available < self.params.mining_table_num_rows {
            return;
        }
        if self.params.thread_count == 0 {
            self.mining_pass(&mut recording);
        } else {
            drop(recording);
            log::trace!("notify mining worker (available={available})");
            let _gate = self.gate.lock().unwrap();
            self.available.notify_one();
        }
    }

    /// One full mine/notify/merge cycle over `table`.
    fn mining_pass(&self, table: &mut RecordTable) {
        if table.available() == 0 {
            log::error!("no requests available for mining");
        }
        let mut mined = self.mined.lock().unwrap();
        log::debug!(
            "{}",
            style(format!(
                "mining RT{{{}}} MT{{{}}} PT{{{}}}",
                table.len(),
                table.available(),
                mined.len(),
            ))
            .cyan()
        );
        table.process(&self.params, |source, associations| {
            mined.append(source.request, associations.iter().copied());
        });
        self.notify(&mined);
        self.query.write().unwrap().merge(&mut mined);
    }

    fn notify(&self, mined: &PrefetchTable) {
        let mut callbacks = self.callbacks.lock().unwrap();
        mined.notify(|source, associations| {
            for (owner, callback) in callbacks.iter_mut() {
                log::trace!(
                    "notify owner {owner:#x} for {source} ({} associations)",
                    associations.len(),
                );
                let _status = callback(source, associations);
            }
        });
    }
}

/// The mining worker: wait until the recording side has filled the mining
/// set (or shutdown is requested), swap buffers, mine offline, publish.
fn mine(shared: &Shared) {
    let params = &shared.params;
    let mut spare = RecordTable::new(
        params.record_table_num_rows,
        params.mining_table_num_rows,
    );
    loop {
        let mut gate = shared.gate.lock().unwrap();
        loop {
            if gate.rows == 0 {
                log::debug!("mining worker: {}", Phase::Exiting);
                return;
            }
            if shared.ready_for_mining(gate.rows) {
                break;
            }
            gate = shared.available.wait(gate).unwrap();
        }
        drop(gate);

        log::trace!("mining worker: {}", Phase::Swapping);
        std::mem::swap(&mut *shared.recording.lock().unwrap(), &mut spare);

        log::trace!("mining worker: {}", Phase::Mining);
        let mut mined = shared.mined.lock().unwrap();
        spare.process(params, |source, associations| {
            mined.append(source.request, associations.iter().copied());
        });

        log::trace!("mining worker: {}", Phase::Notifying);
        shared.notify(&mined);

        log::trace!("mining worker: {}", Phase::Merging);
        shared.query.write().unwrap().merge(&mut mined);
        drop(mined);

        log::trace!("mining worker: {}", Phase::Idle);
    }
}

/// Owner of the predictor state and its mining worker.
///
/// Consumers interact through [`Link`] handles, which share the state and
/// keep it alive; the predictor itself owns the worker and joins it on drop.
pub struct Predictor {
    shared: Arc<Shared>,
    miner: Option<thread::JoinHandle<()>>,
}

impl Predictor {
    pub fn new(params: PredictorParams) -> Result<Self, ConfigError> {
        let mut params = params;
        params.validate()?;
        if params.thread_count > 1 {
            log::warn!(
                "requested {} mining threads, only one is supported",
                params.thread_count,
            );
            params.thread_count = 1;
        }
        log::info!(
            "predictor tables: record {} / mining {} / prefetch {} rows, support {}..={}",
            params.record_table_num_rows,
            params.mining_table_num_rows,
            params.prefetch_table_num_rows,
            params.min_support,
            params.max_support,
        );

        let shared = Arc::new(Shared {
            ts: AtomicU64::new(0),
            recording: Mutex::new(RecordTable::new(
                params.record_table_num_rows,
                params.mining_table_num_rows,
            )),
            mined: Mutex::new(PrefetchTable::new(
                params.mining_table_num_rows,
                params.pf_list_size,
            )),
            query: RwLock::new(PrefetchTable::new(
                params.prefetch_table_num_rows,
                params.pf_list_size,
            )),
            callbacks: Mutex::new(HashMap::new()),
            gate: Mutex::new(Gate {
                rows: params.mining_table_num_rows,
            }),
            available: Condvar::new(),
            params,
        });

        let miner = (shared.params.thread_count == 1).then(|| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || mine(&shared))
        });

        Ok(Self { shared, miner })
    }

    /// Register a consumer and return its handle.
    pub fn link(&self) -> Link {
        log::debug!("new link registered");
        Link {
            shared: Arc::clone(&self.shared),
        }
    }

    /// As [`Self::link`], also registering (or, with `None`, removing) the
    /// notification callback of `owner`.
    pub fn link_with_callback(&self, owner: u64, callback: Option<NotifyFn>) -> Link {
        log::debug!("new link (owner {owner:#x}) registered");
        let mut callbacks = self.shared.callbacks.lock().unwrap();
        match callback {
            Some(callback) => {
                callbacks.insert(owner, callback);
            }
            None => {
                callbacks.remove(&owner);
            }
        }
        drop(callbacks);
        self.link()
    }
}

impl Drop for Predictor {
    fn drop(&mut self) {
        log::debug!("shutting down predictor");
        {
            let mut gate = self.shared.gate.lock().unwrap();
            gate.rows = 0;
            self.shared.available.notify_one();
        }
        if let Some(miner) = self.miner.take() {
            let _ = miner.join();
        }
    }
}

/// Shared handle through which producers feed and consumers query the
/// predictor. Synchronization is internal; all methods take `&self`.
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
}

impl Link {
    /// Feed one observed request. Advances the reference timestamp and
    /// records the request; may run an inline mining pass in single-threaded
    /// mode but never waits for the mining worker.
    pub fn compute(&self, request: Request, _timestamp: u64) -> Result<(), PredictorError> {
        self.shared.ts.fetch_add(1, Ordering::Relaxed);
        self.shared.record(request);
        Ok(())
    }

    /// Snapshot of the published association list for `request`. Only one
    /// priority level is implemented; the argument is accepted for API
    /// compatibility.
    #[must_use]
    pub fn associated_requests(&self, request: &Request, _priority: f64) -> Vec<Request> {
        let query = self.shared.query.read().unwrap();
        let associations = query.associations(request);
        if !associations.is_empty() {
            log::trace!("{request} has {} associations", associations.len());
        }
        associations
    }

    #[must_use]
    pub fn associated_request(&self, request: &Request, priority: f64) -> Option<Request> {
        self.associated_requests(request, priority).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::{Predictor, Request};
    use crate::config::PredictorParams;
    use crate::testing::init_test;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn feed(link: &super::Link, addrs: &[u64]) {
        for &addr in addrs {
            link.compute(Request::read(addr, 512), 0).unwrap();
        }
    }

    fn small_params(mining_rows: usize) -> PredictorParams {
        PredictorParams {
            mining_table_num_rows: mining_rows,
            ..PredictorParams::unit_test()
        }
    }

    #[test]
    fn association_discovery_inline() {
        init_test();
        let predictor = Predictor::new(small_params(2)).unwrap();
        let link = predictor.link();
        feed(&link, &[0, 512, 0, 512, 1024]);

        let a = Request::read(0, 512);
        let associated: Vec<_> = link
            .associated_requests(&a, 0.0)
            .iter()
            .map(|r| r.addr)
            .collect();
        assert_eq!(associated, vec![512]);
        assert_eq!(link.associated_request(&a, 0.0).unwrap().addr, 512);
        // B was mined without followers
        assert!(link
            .associated_requests(&Request::read(512, 512), 0.0)
            .is_empty());
    }

    #[test]
    fn no_associations_before_mining_triggers() {
        init_test();
        let predictor = Predictor::new(small_params(4)).unwrap();
        let link = predictor.link();
        feed(&link, &[0, 512, 0, 512]);
        // only two of four mining rows filled, nothing published
        assert!(link
            .associated_requests(&Request::read(0, 512), 0.0)
            .is_empty());
    }

    #[test]
    fn callbacks_fire_once_per_mined_source() {
        init_test();
        let predictor = Predictor::new(small_params(2)).unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let link = predictor.link_with_callback(
            0xca11,
            Some(Box::new(move |_source, _associations| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            })),
        );
        feed(&link, &[0, 512, 0, 512]);
        assert_eq!(notified.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deregistered_callback_stays_silent() {
        init_test();
        let predictor = Predictor::new(small_params(2)).unwrap();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        predictor.link_with_callback(
            0xca11,
            Some(Box::new(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            })),
        );
        let link = predictor.link_with_callback(0xca11, None);
        feed(&link, &[0, 512, 0, 512]);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn thread_count_above_one_is_clamped() {
        init_test();
        let params = PredictorParams {
            thread_count: 8,
            ..small_params(2)
        };
        let predictor = Predictor::new(params).unwrap();
        assert!(predictor.miner.is_some());
    }

    #[test]
    fn rejects_empty_tables() {
        init_test();
        let params = PredictorParams {
            mining_table_num_rows: 0,
            ..PredictorParams::unit_test()
        };
        assert!(Predictor::new(params).is_err());
    }

    #[test]
    fn threaded_mining_publishes_associations() {
        init_test();
        let params = PredictorParams {
            thread_count: 1,
            ..small_params(2)
        };
        let predictor = Predictor::new(params).unwrap();
        let link = predictor.link();
        feed(&link, &[0, 512, 0, 512]);

        // mining is asynchronous; poll for the published result
        let a = Request::read(0, 512);
        let mut associated = Vec::new();
        for _ in 0..200 {
            associated = link.associated_requests(&a, 0.0);
            if !associated.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(associated.len(), 1);
        assert_eq!(associated[0].addr, 512);
        drop(predictor); // joins the worker
    }

    #[test]
    fn shutdown_joins_idle_worker() {
        init_test();
        let params = PredictorParams {
            thread_count: 1,
            ..small_params(64)
        };
        let predictor = Predictor::new(params).unwrap();
        drop(predictor);
    }
}
