//! Cooperative shutdown signalling shared by every long-running task in the
//! provisioner binary (the Scanner loop, the gateway's background metrics
//! flush, etc): a single [`Shutdown`] handle broadcasts the "stop" signal
//! and then waits for every task that took out a [`ShutdownGuard`] to finish
//! its current unit of work before the process exits.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use lazy_static::lazy_static;
use tokio::sync::Notify;

struct Inner {
    triggered: AtomicBool,
    triggered_notify: Notify,
    outstanding: AtomicUsize,
    drained_notify: Notify,
}

/// A cloneable shutdown coordinator. Cloning shares the same underlying
/// signal; every clone observes the same trigger and contributes to the
/// same outstanding-guard count.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                triggered_notify: Notify::new(),
                outstanding: AtomicUsize::new(0),
                drained_notify: Notify::new(),
            }),
        }
    }

    /// Signal every waiter. Idempotent.
    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::SeqCst) {
            self.inner.triggered_notify.notify_waiters();
            if self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                self.inner.drained_notify.notify_waiters();
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Resolve once [`Shutdown::trigger`] has been called.
    pub async fn wait_for_trigger(&self) {
        if self.is_triggered() {
            return;
        }
        let notified = self.inner.triggered_notify.notified();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Take out a guard marking "one unit of shutdown-sensitive work in
    /// flight". Returns `None` if shutdown has already been triggered: the
    /// caller should not start new work.
    pub fn guard(&self) -> Option<ShutdownGuard> {
        if self.is_triggered() {
            return None;
        }
        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        Some(ShutdownGuard {
            inner: self.inner.clone(),
        })
    }

    /// Resolve once shutdown has been triggered *and* every outstanding
    /// guard has been dropped. Callers typically `trigger()` then
    /// `await wait_drained()` with an outer timeout.
    pub async fn wait_drained(&self) {
        loop {
            if self.is_triggered() && self.inner.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.inner.drained_notify.notified().await;
        }
    }
}

/// RAII handle returned by [`Shutdown::guard`]; dropping it decrements the
/// outstanding count and wakes [`Shutdown::wait_drained`] waiters once it
/// reaches zero.
pub struct ShutdownGuard {
    inner: Arc<Inner>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1
            && self.inner.triggered.load(Ordering::SeqCst)
        {
            self.inner.drained_notify.notify_waiters();
        }
    }
}

lazy_static! {
    static ref GLOBAL: Shutdown = Shutdown::new();
}

/// The process-wide shutdown handle, for code that cannot conveniently
/// thread a [`Shutdown`] through (e.g. a signal handler installed in
/// `main`).
pub fn global() -> Shutdown {
    GLOBAL.clone()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_wakes_waiter() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_trigger().await;
        });
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_for_trigger did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn drained_waits_for_guards() {
        let shutdown = Shutdown::new();
        let guard = shutdown.guard().expect("not yet triggered");
        shutdown.trigger();

        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_drained().await;
        });

        // The guard is still held, so wait_drained must not have resolved yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_drained did not resolve after guard drop")
            .unwrap();
    }

    #[tokio::test]
    async fn guard_refused_after_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        assert!(shutdown.guard().is_none());
    }
}
