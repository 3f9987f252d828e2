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
//! A cancellation token tying pending operations to session lifetime.
//!
//! Handlers registered before cancellation run exactly once, inside the
//! `cancel` call; handlers registered after run immediately on
//! registration. The first non-OK callback result is latched and returned
//! by every subsequent `cancel`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::SyncGroup;
use zenoh_leaf_core::{zlock, ZResult};

pub type CancelCallback = Box<dyn FnMut() -> ZResult<()> + Send>;

pub struct OnCancelHandler {
    pub callback: CancelCallback,
    /// When present, `cancel` additionally waits until every in-flight
    /// execution tracked by the group has returned.
    pub sync_group: Option<SyncGroup>,
}

impl OnCancelHandler {
    pub fn new(callback: CancelCallback) -> OnCancelHandler {
        OnCancelHandler {
            callback,
            sync_group: None,
        }
    }

    fn run(&mut self, deadline: Option<Instant>) -> ZResult<()> {
        (self.callback)()?;
        match (&self.sync_group, deadline) {
            (Some(group), Some(deadline)) => group.wait_deadline(deadline),
            (Some(group), None) => {
                group.wait();
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }
}

struct Inner {
    is_cancelled: bool,
    cancel_result: ZResult<()>,
    handlers: Vec<OnCancelHandler>,
}

pub struct CancellationToken {
    inner: Mutex<Inner>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken {
            inner: Mutex::new(Inner {
                is_cancelled: false,
                cancel_result: Ok(()),
                handlers: Vec::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        zlock!(self.inner).is_cancelled
    }

    /// Register `handler`; if the token is already cancelled the handler
    /// runs right away and the latched result is returned.
    pub fn add_handler(&self, mut handler: OnCancelHandler) -> ZResult<()> {
        let mut inner = zlock!(self.inner);
        if inner.is_cancelled {
            let _ = handler.run(None);
            return inner.cancel_result;
        }
        inner.handlers.push(handler);
        Ok(())
    }

    pub fn cancel(&self) -> ZResult<()> {
        self.do_cancel(None)
    }

    pub fn cancel_with_timeout(&self, timeout: Duration) -> ZResult<()> {
        self.do_cancel(Some(Instant::now() + timeout))
    }

    fn do_cancel(&self, deadline: Option<Instant>) -> ZResult<()> {
        let mut handlers = {
            let mut inner = zlock!(self.inner);
            if inner.is_cancelled {
                return inner.cancel_result;
            }
            inner.is_cancelled = true;
            std::mem::take(&mut inner.handlers)
        };

        // Handlers run outside the token lock so their callbacks may
        // re-enter the token (e.g. issue a new operation).
        let mut result = Ok(());
        for handler in handlers.iter_mut() {
            result = handler.run(deadline);
            if result.is_err() {
                // Handlers past a failure are dropped without running;
                // the first failure is latched.
                break;
            }
        }
        zlock!(self.inner).cancel_result = result;
        result
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        CancellationToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use zenoh_leaf_core::ZError;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> OnCancelHandler {
        let counter = counter.clone();
        OnCancelHandler::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn handlers_run_exactly_once_on_cancel() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            token.add_handler(counting_handler(&calls)).unwrap();
        }
        assert!(!token.is_cancelled());
        assert_eq!(token.cancel(), Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // A second cancel does not run anything again.
        assert_eq!(token.cancel(), Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn late_handlers_run_immediately() {
        let token = CancellationToken::new();
        token.cancel().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        token.add_handler(counting_handler(&calls)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_failure_is_latched_and_short_circuits() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        token.add_handler(counting_handler(&calls)).unwrap();
        token
            .add_handler(OnCancelHandler::new(Box::new(|| Err(ZError::SystemGeneric))))
            .unwrap();
        token.add_handler(counting_handler(&calls)).unwrap();

        assert_eq!(token.cancel(), Err(ZError::SystemGeneric));
        // The handler after the failing one never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The result is latched.
        assert_eq!(token.cancel(), Err(ZError::SystemGeneric));
        assert_eq!(token.add_handler(counting_handler(&calls)), Err(ZError::SystemGeneric));
        // But the late handler still ran.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_waits_on_sync_groups() {
        let token = CancellationToken::new();
        let group = SyncGroup::new();
        let notifier = group.notifier();
        let mut handler = OnCancelHandler::new(Box::new(|| Ok(())));
        handler.sync_group = Some(group);
        token.add_handler(handler).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(notifier);
        });
        // Blocks until the notifier is dropped.
        assert_eq!(token.cancel(), Ok(()));
        releaser.join().unwrap();
    }

    #[test]
    fn cancel_with_timeout_reports_stuck_groups() {
        let token = CancellationToken::new();
        let group = SyncGroup::new();
        let _notifier = group.notifier();
        let mut handler = OnCancelHandler::new(Box::new(|| Ok(())));
        handler.sync_group = Some(group);
        token.add_handler(handler).unwrap();

        assert_eq!(
            token.cancel_with_timeout(Duration::from_millis(20)),
            Err(ZError::TimedOut)
        );
    }
}
