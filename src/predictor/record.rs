//! Observation recording and association mining over recorded requests.

use crate::config::PredictorParams;
use crate::request::Request;
use crate::ring::Ring;
use itertools::Itertools;
use std::collections::HashMap;

/// A request together with every timestamp at which it was observed.
#[derive(Debug, Default, Clone)]
pub struct Record {
    pub request: Request,
    times: Vec<i64>,
}

impl Record {
    fn new(request: Request) -> Self {
        Self {
            request,
            times: Vec::new(),
        }
    }

    /// Timestamp of the `index`-th observation.
    #[must_use]
    pub fn stamp(&self, index: usize) -> i64 {
        self.times[index]
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn valid(&self) -> bool {
        !self.times.is_empty()
    }

    fn touch(&mut self, ts: i64) {
        debug_assert!(self.times.last().is_none_or(|&last| last <= ts));
        self.times.push(ts);
    }

    /// Test whether `other` co-occurs with this record.
    ///
    /// Rejected when the observation counts differ by more than `confidence`
    /// or when more than `confidence` paired timestamps (from the second
    /// observation on) are further than `lookahead` apart. On success returns
    /// the smallest and largest pairwise delta seen; with a single paired
    /// observation no delta is examined and the `(i64::MAX, i64::MIN)` seed
    /// bounds come back unchanged.
    #[must_use]
    pub fn association(
        &self,
        other: &Record,
        lookahead: u64,
        confidence: usize,
    ) -> Option<(i64, i64)> {
        if self.count().abs_diff(other.count()) > confidence {
            return None;
        }
        let count = self.count().min(other.count());
        debug_assert!(count >= 1);

        let mut bounds = (i64::MAX, i64::MIN);
        let mut error = 0;
        for i in 1..count {
            let delta = (self.times[i] - other.times[i]).abs();
            if delta.unsigned_abs() > lookahead {
                error += 1;
            }
            if error > confidence {
                return None;
            }
            bounds = (bounds.0.min(delta), bounds.1.max(delta));
        }
        Some(bounds)
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} TS{{{}", self.request, self.count())?;
        if let (Some(first), Some(last)) = (self.times.first(), self.times.last()) {
            write!(f, ",{first}..{last}")?;
        }
        write!(f, "}}")
    }
}

/// Where an address currently lives inside a [`RecordTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Recording(usize),
    Mining(usize),
}

/// Classifies observed requests by access count.
///
/// New addresses accumulate in the recording ring; once an address reaches
/// `min_support` observations it moves to the mining ring, and past
/// `max_support` it is dropped as too frequent to predict anything. One index
/// spans both rings so a promoted address keeps collecting timestamps in
/// place.
#[derive(Debug)]
pub struct RecordTable {
    recording: Ring<Record>,
    mining: Ring<Record>,
    index: HashMap<u64, Slot>,
}

impl RecordTable {
    #[must_use]
    pub fn new(record_rows: usize, mining_rows: usize) -> Self {
        Self {
            recording: Ring::new(record_rows),
            mining: Ring::new(mining_rows),
            index: HashMap::with_capacity(record_rows + mining_rows),
        }
    }

    /// Number of tracked addresses across both rings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of requests ready for a mining pass.
    #[must_use]
    pub fn available(&self) -> usize {
        self.mining.len()
    }

    #[must_use]
    pub fn find(&self, addr: u64) -> Option<&Record> {
        self.index.get(&addr).map(|&slot| self.record(slot))
    }

    fn record(&self, slot: Slot) -> &Record {
        match slot {
            Slot::Recording(i) => self.recording.slot(i),
            Slot::Mining(i) => self.mining.slot(i),
        }
    }

    fn record_mut(&mut self, slot: Slot) -> &mut Record {
        match slot {
            Slot::Recording(i) => self.recording.slot_mut(i),
            Slot::Mining(i) => self.mining.slot_mut(i),
        }
    }

    /// Record one observation of `request` at timestamp `ts`.
    pub fn insert(&mut self, request: Request, ts: i64, params: &PredictorParams) {
        let slot = self.upsert(request);
        let record = self.record_mut(slot);
        record.request.size = params.req_size_update_policy.apply(
            record.request.size,
            request.size,
            params.limit_size_for_size_policy,
        );
        record.touch(ts);
        log::trace!("incoming {record}");

        let count = record.count();
        if count == params.min_support {
            self.promote(slot);
        } else if count > params.max_support {
            self.prune(slot);
        }
    }

    fn upsert(&mut self, request: Request) -> Slot {
        let key = request.addr;
        if let Some(&slot) = self.index.get(&key) {
            return slot;
        }
        // evict whichever address owns the slot the push will overwrite
        let target = self.recording.next_slot();
        let displaced = self.recording.slot(target).request.addr;
        if self.index.get(&displaced) == Some(&Slot::Recording(target)) {
            self.index.remove(&displaced);
        }
        let slot = self.recording.push(Record::new(request));
        self.index.insert(key, Slot::Recording(slot));
        Slot::Recording(slot)
    }

    /// Move a recording entry that just reached `min_support` into the
    /// mining ring. A full mining ring drops its oldest entry to make room.
    fn promote(&mut self, slot: Slot) {
        let Slot::Recording(from) = slot else {
            // min_support is reached exactly once per tracked address
            debug_assert!(false, "promotion of a mined entry");
            return;
        };
        let record = self.extract_recording(from);
        log::trace!("move to mining table {record}");
        let key = record.request.addr;

        let to = if self.mining.is_full() {
            let front = self.mining.front_slot();
            let dropped = self.mining.slot(front).request.addr;
            log::trace!("drop oldest mined request {}", self.mining.slot(front));
            if self.index.get(&dropped) == Some(&Slot::Mining(front)) {
                self.index.remove(&dropped);
            }
            // reuse the slot in place; the mining sweep sorts by first
            // timestamp, so ring order does not matter here
            *self.mining.slot_mut(front) = record;
            front
        } else {
            self.mining.push(record)
        };
        self.index.insert(key, Slot::Mining(to));
    }

    /// Remove an over-frequent entry from the mining ring by swapping it
    /// with the ring's back and popping.
    fn prune(&mut self, slot: Slot) {
        let record = self.record(slot);
        log::trace!("drop too frequent {record}");
        let key = record.request.addr;

        match slot {
            Slot::Mining(at) => {
                if self.mining.is_empty() {
                    log::error!("empty mining table while pruning {key}");
                    return;
                }
                self.index.remove(&key);
                let back = self.mining.back_slot();
                if at != back {
                    let moved = std::mem::take(self.mining.slot_mut(back));
                    self.index.insert(moved.request.addr, Slot::Mining(at));
                    *self.mining.slot_mut(at) = moved;
                }
                self.mining.pop_back();
            }
            Slot::Recording(at) => {
                // only reachable when max_support < min_support
                debug_assert!(false, "pruning an entry that was never promoted");
                self.index.remove(&key);
                self.extract_recording(at);
            }
        }
    }

    /// Take the record at `slot` out of the recording ring, backfilling the
    /// hole from the ring's back and redirecting the index entry of the
    /// moved record.
    fn extract_recording(&mut self, slot: usize) -> Record {
        let back = self.recording.back_slot();
        let record = std::mem::take(self.recording.slot_mut(slot));
        if slot != back {
            let moved = std::mem::take(self.recording.slot_mut(back));
            debug_assert_eq!(
                self.index.get(&moved.request.addr),
                Some(&Slot::Recording(back))
            );
            self.index.insert(moved.request.addr, Slot::Recording(slot));
            *self.recording.slot_mut(slot) = moved;
        }
        self.recording.pop_back();
        record
    }

    /// Mine the accumulated set: sweep entries in first-observation order,
    /// associate each with its in-window followers and emit the resulting
    /// association list. The mining ring is left empty.
    ///
    /// The first accepted follower is always emitted; later followers only
    /// when their association's minimum delta is exactly one tick.
    pub fn process(
        &mut self,
        params: &PredictorParams,
        mut emit: impl FnMut(&Record, &Ring<Request>),
    ) {
        let entries: Vec<Record> = self
            .mining
            .drain()
            .into_iter()
            .sorted_by_key(|record| record.stamp(0))
            .collect();
        for record in &entries {
            let removed = self.index.remove(&record.request.addr);
            debug_assert!(matches!(removed, Some(Slot::Mining(_))));
        }

        let lookahead = params.lookahead_range as i64;
        for (i, record) in entries.iter().enumerate() {
            let mut associations = Ring::new(params.pf_list_size);
            let mut first = true;
            for follower in &entries[i + 1..] {
                if follower.stamp(0) - record.stamp(0) > lookahead {
                    break;
                }
                if let Some((min_delta, _)) =
                    record.association(follower, params.lookahead_range, params.confidence)
                {
                    let add = first || min_delta == 1;
                    first = false;
                    if add {
                        associations.push(follower.request);
                    }
                }
            }
            emit(record, &associations);
        }
    }
}
