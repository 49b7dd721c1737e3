//! Prediction storage: source request to bounded association list.

use crate::request::Request;
use crate::ring::{IndexedRing, Keyed};

/// A source request and the follow-up requests mined for it.
///
/// The association list is itself a bounded indexed ring keyed by address,
/// so re-adding a known follow-up is a no-op and overflow evicts the oldest.
#[derive(Debug, Default, Clone)]
pub struct Prediction {
    pub request: Request,
    pub associations: IndexedRing<Request>,
}

impl Prediction {
    fn new(request: Request, limit: usize) -> Self {
        Self {
            request,
            associations: IndexedRing::with_capacity(limit),
        }
    }

    fn empty(limit: usize) -> Self {
        Self::new(Request::default(), limit)
    }
}

impl Keyed for Prediction {
    fn key(&self) -> u64 {
        self.request.addr
    }

    fn valid(&self) -> bool {
        self.request.valid()
    }
}

/// Bounded map from source request to [`Prediction`].
#[derive(Debug)]
pub struct PrefetchTable {
    table: IndexedRing<Prediction>,
    limit: usize,
}

impl PrefetchTable {
    #[must_use]
    pub fn new(rows: usize, limit: usize) -> Self {
        Self {
            table: IndexedRing::with_slots(rows, || Prediction::empty(limit)),
            limit,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[must_use]
    pub fn find(&self, request: &Request) -> Option<&Prediction> {
        self.table.find(request.addr)
    }

    /// Current association list of `request`, valid entries only.
    #[must_use]
    pub fn associations(&self, request: &Request) -> Vec<Request> {
        match self.find(request) {
            Some(prediction) => prediction
                .associations
                .iter()
                .filter(|r| r.valid())
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    fn upsert(&mut self, source: Request) -> usize {
        let (slot, _inserted) = self.table.push(Prediction::new(source, self.limit));
        slot
    }

    /// Upsert the prediction for `source` and add one follow-up.
    pub fn push(&mut self, source: Request, association: Request) {
        let slot = self.upsert(source);
        self.table.get_mut(slot).associations.push(association);
    }

    /// Upsert the prediction for `source` and add every valid follow-up.
    pub fn append(&mut self, source: Request, associations: impl IntoIterator<Item = Request>) {
        let slot = self.upsert(source);
        let prediction = self.table.get_mut(slot);
        for association in associations {
            if association.valid() {
                prediction.associations.push(association);
            }
        }
    }

    /// Promote every prediction of `other` that has at least one follow-up
    /// into this table, merging association lists; `other` is cleared.
    pub fn merge(&mut self, other: &mut PrefetchTable) {
        for logical in 0..other.table.len() {
            let incoming = other.table.logical_mut(logical);
            if incoming.associations.is_empty() {
                continue;
            }
            let source = incoming.request;
            let mut associations = std::mem::take(&mut incoming.associations);
            let slot = self.upsert(source);
            self.table
                .get_mut(slot)
                .associations
                .merge(&mut associations);
        }
        other.clear();
    }

    pub fn clear(&mut self) {
        let limit = self.limit;
        self.table.clear_with(|| Prediction::empty(limit));
    }

    /// Invoke `f` once per stored prediction with a compact list of its
    /// valid associations.
    pub fn notify(&self, mut f: impl FnMut(&Request, &[Request])) {
        let mut associations = Vec::with_capacity(self.limit);
        for prediction in self.table.iter() {
            associations.clear();
            associations.extend(
                prediction
                    .associations
                    .iter()
                    .filter(|r| r.valid())
                    .copied(),
            );
            f(&prediction.request, &associations);
        }
    }
}
