//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
//! A counter with a condvar: waiters block until every notifier has been
//! dropped. Lets a canceller observe that all in-flight executions of a
//! callback have returned.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use zenoh_leaf_core::{zlock, ZError, ZResult};

struct Inner {
    count: Mutex<usize>,
    cond: Condvar,
}

#[derive(Clone)]
pub struct SyncGroup {
    inner: Arc<Inner>,
}

impl SyncGroup {
    pub fn new() -> SyncGroup {
        SyncGroup {
            inner: Arc::new(Inner {
                count: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    /// Register an in-flight execution; the group stays non-zero until
    /// the notifier drops.
    pub fn notifier(&self) -> Notifier {
        *zlock!(self.inner.count) += 1;
        Notifier {
            inner: self.inner.clone(),
        }
    }

    pub fn count(&self) -> usize {
        *zlock!(self.inner.count)
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = zlock!(self.inner.count);
        while *count > 0 {
            count = match self.inner.cond.wait(count) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until the counter reaches zero or the deadline passes.
    pub fn wait_deadline(&self, deadline: Instant) -> ZResult<()> {
        let mut count = zlock!(self.inner.count);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return Err(ZError::TimedOut);
            }
            let (guard, timeout) = match self.inner.cond.wait_timeout(count, deadline - now) {
                Ok(res) => res,
                Err(poisoned) => poisoned.into_inner(),
            };
            count = guard;
            if timeout.timed_out() && *count > 0 {
                return Err(ZError::TimedOut);
            }
        }
        Ok(())
    }
}

impl Default for SyncGroup {
    fn default() -> Self {
        SyncGroup::new()
    }
}

/// Keeps its [`SyncGroup`] non-zero until dropped.
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        *zlock!(self.inner.count) += 1;
        Notifier {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let mut count = zlock!(self.inner.count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_once_notifiers_drop() {
        let group = SyncGroup::new();
        let n1 = group.notifier();
        let n2 = n1.clone();
        assert_eq!(group.count(), 2);

        let waiter = {
            let group = group.clone();
            thread::spawn(move || group.wait())
        };
        drop(n1);
        thread::sleep(Duration::from_millis(10));
        drop(n2);
        waiter.join().unwrap();
        assert_eq!(group.count(), 0);
    }

    #[test]
    fn wait_deadline_times_out() {
        let group = SyncGroup::new();
        let _n = group.notifier();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(group.wait_deadline(deadline), Err(ZError::TimedOut));
    }

    #[test]
    fn wait_on_empty_group_is_immediate() {
        let group = SyncGroup::new();
        group.wait();
        assert!(group
            .wait_deadline(Instant::now() + Duration::from_millis(1))
            .is_ok());
    }
}
