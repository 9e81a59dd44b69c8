//! Correlation of requests and responses over the duplex channel.
//!
//! Each request gets a fresh id (1, 2, 3, …, never reused) and a slot in an
//! explicit map. The slot exists before the request frame is written, so a
//! response can never arrive ahead of its registration. Responses may come
//! back in any order; each one resolves exactly the slot with its id.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::protocol::{split_response, RequestId, RequestKind};

/// One outstanding request.
#[derive(Debug)]
pub struct Pending<R> {
    pub id: RequestId,
    pub kind: RequestKind,
    pub responder: R,
}

/// Outstanding requests keyed by id.
///
/// Generic over the responder so the owner decides what a resolution does
/// (wake a caller, update local state, or both).
#[derive(Debug)]
pub struct PendingRequests<R> {
    next_id: RequestId,
    slots: HashMap<RequestId, Pending<R>>,
}

impl<R> Default for PendingRequests<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> PendingRequests<R> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            slots: HashMap::new(),
        }
    }

    /// Allocate the next id and park `responder` under it.
    pub fn register(&mut self, kind: RequestKind, responder: R) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        self.slots.insert(
            id,
            Pending {
                id,
                kind,
                responder,
            },
        );
        id
    }

    /// Take the slot for `id`. A second resolution of the same id finds nothing.
    pub fn resolve(&mut self, id: RequestId) -> Option<Pending<R>> {
        self.slots.remove(&id)
    }

    /// Drop every slot whose responder matches `abandoned`. Returns how many were released.
    pub fn release_where(&mut self, mut abandoned: impl FnMut(&R) -> bool) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, p| !abandoned(&p.responder));
        before - self.slots.len()
    }

    /// Remove all slots, oldest first.
    pub fn drain(&mut self) -> Vec<Pending<R>> {
        let mut all: Vec<Pending<R>> = self.slots.drain().map(|(_, p)| p).collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The id the next registration will receive.
    pub fn next_id(&self) -> RequestId {
        self.next_id
    }
}

/// Turn positional response args into the call's outcome.
pub fn settle(kind: RequestKind, args: Vec<Value>) -> Result<Value> {
    split_response(args).map_err(|error| SyncError::RemoteCall { kind, error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut pending = PendingRequests::new();
        let a = pending.register(RequestKind::ListPages, ());
        let b = pending.register(RequestKind::ReadPage, ());
        let c = pending.register(RequestKind::ReadPage, ());
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_ids_not_reused_after_resolution() {
        let mut pending = PendingRequests::new();
        let a = pending.register(RequestKind::IndexGet, ());
        pending.resolve(a).unwrap();
        let b = pending.register(RequestKind::IndexGet, ());
        assert!(b > a);
    }

    #[test]
    fn test_out_of_order_resolution() {
        let mut pending = PendingRequests::new();
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|tag| pending.register(RequestKind::ReadPage, tag))
            .collect();

        assert_eq!(pending.resolve(ids[2]).unwrap().responder, "c");
        assert_eq!(pending.resolve(ids[0]).unwrap().responder, "a");
        assert_eq!(pending.resolve(ids[1]).unwrap().responder, "b");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_single_resolution_per_id() {
        let mut pending = PendingRequests::new();
        let id = pending.register(RequestKind::DeletePage, ());
        assert!(pending.resolve(id).is_some());
        assert!(pending.resolve(id).is_none());
        assert!(pending.resolve(999).is_none());
    }

    #[test]
    fn test_release_where() {
        let mut pending = PendingRequests::new();
        pending.register(RequestKind::IndexGet, true);
        pending.register(RequestKind::IndexGet, false);
        pending.register(RequestKind::IndexGet, true);
        assert_eq!(pending.release_where(|abandoned| *abandoned), 2);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_drain_oldest_first() {
        let mut pending = PendingRequests::new();
        for _ in 0..5 {
            pending.register(RequestKind::ListPages, ());
        }
        let ids: Vec<_> = pending.drain().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(pending.is_empty());
        assert_eq!(pending.next_id(), 6);
    }

    #[test]
    fn test_settle() {
        assert_eq!(settle(RequestKind::IndexGet, vec![json!(null), json!(7)]).unwrap(), json!(7));

        let err = settle(RequestKind::IndexGet, vec![json!("not found")]).unwrap_err();
        match err {
            SyncError::RemoteCall { kind, error } => {
                assert_eq!(kind, RequestKind::IndexGet);
                assert_eq!(error, json!("not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
