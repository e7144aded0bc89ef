//! Fence between branch updates and sweep batches.

use super::GcScope;
use crate::error::{CoreError, CoreResult};
use crate::id::{ObjectId, RepoId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;

/// Coordinates head updates with running collection passes.
///
/// A head update holds the shared side across its completeness check,
/// compare-and-swap and [`GcBarrier::publish`]. A sweep batch holds the
/// exclusive side, drains the heads published since its last batch and marks
/// them before deleting anything.
#[derive(Debug, Default)]
pub(crate) struct GcBarrier {
    fence: RwLock<()>,
    passes: Mutex<PassRegistry>,
}

#[derive(Debug, Default)]
struct PassRegistry {
    next_id: u64,
    active: HashMap<u64, ActivePass>,
}

#[derive(Debug)]
struct ActivePass {
    scope: GcScope,
    published: Vec<(RepoId, ObjectId)>,
}

/// Registration of one pass with the barrier.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PassToken(u64);

impl GcBarrier {
    pub(crate) fn update_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.fence.read()
    }

    pub(crate) fn sweep_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.fence.write()
    }

    /// Registers a pass. Overlapping scopes are refused.
    pub(crate) fn register(&self, scope: GcScope) -> CoreResult<PassToken> {
        let mut passes = self.passes.lock();
        if passes.active.values().any(|p| p.scope.overlaps(&scope)) {
            return Err(CoreError::GcBusy);
        }
        passes.next_id += 1;
        let id = passes.next_id;
        passes.active.insert(
            id,
            ActivePass {
                scope,
                published: Vec::new(),
            },
        );
        Ok(PassToken(id))
    }

    pub(crate) fn unregister(&self, token: &PassToken) {
        self.passes.lock().active.remove(&token.0);
    }

    /// Hands a new head to every pass whose scope covers the repo.
    pub(crate) fn publish(&self, repo: RepoId, head: ObjectId) {
        let mut passes = self.passes.lock();
        for pass in passes.active.values_mut() {
            if pass.scope.covers(repo) {
                pass.published.push((repo, head));
            }
        }
    }

    pub(crate) fn drain(&self, token: &PassToken) -> Vec<(RepoId, ObjectId)> {
        self.passes
            .lock()
            .active
            .get_mut(&token.0)
            .map(|p| std::mem::take(&mut p.published))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_passes_refused() {
        let barrier = GcBarrier::default();
        let a = RepoId::new();
        let b = RepoId::new();

        let first = barrier.register(GcScope::Repo(a)).unwrap();
        assert!(barrier.register(GcScope::Repo(b)).is_ok());
        assert!(matches!(
            barrier.register(GcScope::Repo(a)),
            Err(CoreError::GcBusy)
        ));
        assert!(matches!(barrier.register(GcScope::All), Err(CoreError::GcBusy)));

        barrier.unregister(&first);
        assert!(barrier.register(GcScope::Repo(a)).is_ok());
    }

    #[test]
    fn published_heads_reach_covering_passes() {
        let barrier = GcBarrier::default();
        let a = RepoId::new();
        let b = RepoId::new();
        let token = barrier.register(GcScope::Repo(a)).unwrap();
        let head = ObjectId::of(b"head");

        barrier.publish(a, head);
        barrier.publish(b, head);
        assert_eq!(barrier.drain(&token), vec![(a, head)]);
        assert!(barrier.drain(&token).is_empty());
    }
}
