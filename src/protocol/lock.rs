// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-node advisory lock on a lineage.
//!
//! Stops two local initiator flows from racing on the same cargo. It spares
//! the authority a doomed request; it does not replace it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::custody::CustodyId;
use crate::error::CustodyError;

#[derive(Debug, Clone, Default)]
pub struct LineageLocks {
    held: Arc<Mutex<HashSet<CustodyId>>>,
}

impl LineageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, id: CustodyId) -> Result<LineageGuard, CustodyError> {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(id) {
            return Err(CustodyError::LineageBusy(id));
        }
        Ok(LineageGuard {
            id,
            held: self.held.clone(),
        })
    }
}

/// Releases the lineage on drop.
#[derive(Debug)]
pub struct LineageGuard {
    id: CustodyId,
    held: Arc<Mutex<HashSet<CustodyId>>>,
}

impl Drop for LineageGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let locks = LineageLocks::new();
        let id = CustodyId::new();

        let guard = locks.try_acquire(id).unwrap();
        assert!(matches!(locks.try_acquire(id), Err(CustodyError::LineageBusy(_))));

        drop(guard);
        assert!(locks.try_acquire(id).is_ok());
    }

    #[test]
    fn distinct_lineages_do_not_block() {
        let locks = LineageLocks::new();
        let _a = locks.try_acquire(CustodyId::new()).unwrap();
        assert!(locks.try_acquire(CustodyId::new()).is_ok());
    }
}
