//! What happens when a job fires while its previous run is still going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Policy for overlapping runs of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Skip the new run while the previous one is active
    #[default]
    Skip,
    /// Let runs overlap
    Concurrent,
}

/// Tracks whether a job is running.
pub struct OverlapGuard {
    running: Arc<AtomicBool>,
    policy: OverlapPolicy,
}

impl OverlapGuard {
    /// Create a guard with the given policy.
    pub fn new(policy: OverlapPolicy) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            policy,
        }
    }

    /// A run permit, or `None` when the run must be skipped.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        match self.policy {
            OverlapPolicy::Skip => self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .ok()
                .map(|_| RunGuard {
                    flag: Some(self.running.clone()),
                }),
            OverlapPolicy::Concurrent => Some(RunGuard { flag: None }),
        }
    }

    /// Whether a `Skip` run is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The policy.
    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }
}

/// Run permit; clears the running flag when dropped, even on panic.
pub struct RunGuard {
    flag: Option<Arc<AtomicBool>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(flag) = &self.flag {
            flag.store(false, Ordering::SeqCst);
        }
    }
}
