//! A small cancellation token carrying an optional wall-clock deadline.
//!
//! Hand-rolled over `tokio::sync::Notify` rather than pulling in `tokio-util`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    deadline: Option<Instant>,
    /// This token's own deadline, set only from the timeout passed directly
    /// to `new`/`child` on this token (never inherited from a parent).
    /// Lets a caller tell "my own deadline elapsed" (a timeout) apart from
    /// "an ancestor's deadline elapsed or it was cancelled outright" (a
    /// cancellation), even though `deadline` above folds both together for
    /// scheduling purposes.
    own_deadline: Option<Instant>,
    /// A cancelled parent cancels every descendant; a cancelled child never
    /// affects its parent or siblings (spec.md §5: wave-scoped cancellation
    /// must not reach outside the wave, but the overall deadline or an
    /// operator SIGINT must reach every in-flight task).
    parent: Option<Arc<Inner>>,
}

/// How often `cancelled()` re-checks ancestors for cancellation. Own-token
/// cancellation and own deadlines still wake immediately via `Notify` /
/// an exact sleep; this bound only governs how quickly a *parent's*
/// cancellation is noticed by an already-running child.
const ANCESTOR_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl CancellationToken {
    pub fn new(timeout: Option<Duration>) -> Self {
        let own_deadline = timeout.map(|d| Instant::now() + d);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                deadline: own_deadline,
                own_deadline,
                parent: None,
            }),
        }
    }

    /// A child token whose deadline is the earlier of the parent's and
    /// `override_timeout`, if given, and which is cancelled whenever the
    /// parent is (but not vice versa).
    pub fn child(&self, override_timeout: Option<Duration>) -> Self {
        let overridden_deadline = override_timeout.map(|d| Instant::now() + d);
        let deadline = match (self.inner.deadline, overridden_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                deadline,
                own_deadline: overridden_deadline,
                parent: Some(self.inner.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        Self::inner_cancelled(&self.inner)
    }

    /// Whether this token's own deadline (not an inherited one) has passed.
    /// Distinguishes a genuine timeout on this token from a cancellation
    /// that propagated down from a parent.
    pub fn own_deadline_elapsed(&self) -> bool {
        self.inner.own_deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn inner_cancelled(inner: &Arc<Inner>) -> bool {
        inner.cancelled.load(Ordering::SeqCst)
            || inner.deadline.is_some_and(|d| Instant::now() >= d)
            || inner.parent.as_ref().is_some_and(Self::inner_cancelled)
    }

    /// Resolves once the token or any ancestor is cancelled, or this token's
    /// own deadline passes. Own-cancellation and own-deadline wake promptly;
    /// an ancestor's cancellation is noticed within `ANCESTOR_POLL_INTERVAL`.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let wait = match self.inner.deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(ANCESTOR_POLL_INTERVAL),
                None => ANCESTOR_POLL_INTERVAL,
            };
            tokio::select! {
                _ = self.inner.notify.notified() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancellationToken::new(None);
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        assert!(!token.is_cancelled());
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_triggers_cancellation() {
        let token = CancellationToken::new(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_deadline_is_the_earlier_of_parent_and_override() {
        let parent = CancellationToken::new(Some(Duration::from_secs(100)));
        let child = parent.child(Some(Duration::from_secs(1)));
        assert!(child.inner.deadline.unwrap() < parent.inner.deadline.unwrap());
    }

    #[tokio::test]
    async fn own_deadline_elapsed_ignores_parent_cancellation() {
        let parent = CancellationToken::new(None);
        let child = parent.child(None);
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(!child.own_deadline_elapsed(), "child has no deadline of its own");
    }

    #[tokio::test]
    async fn own_deadline_elapsed_detects_a_genuine_timeout() {
        let parent = CancellationToken::new(Some(Duration::from_secs(100)));
        let child = parent.child(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(child.is_cancelled());
        assert!(child.own_deadline_elapsed());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates_to_already_created_child() {
        let parent = CancellationToken::new(None);
        let child = parent.child(None);
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        tokio::time::timeout(Duration::from_millis(200), child.cancelled())
            .await
            .expect("child.cancelled() should resolve once the parent is cancelled");
    }

    #[tokio::test]
    async fn child_cancellation_does_not_affect_parent_or_siblings() {
        let parent = CancellationToken::new(None);
        let wave_a = parent.child(None);
        let wave_b = parent.child(None);
        wave_a.cancel();
        assert!(wave_a.is_cancelled());
        assert!(!wave_b.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
