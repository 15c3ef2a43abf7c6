// Timed, auto-dismissing notifications

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{store::Store, timer::TaskScope};

pub const DEFAULT_TOAST_DURATION_MS: u64 = 5000;

static TOAST_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToastCategory {
    PersonalBest,
    Milestone,
    Info,
}

impl fmt::Display for ToastCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToastCategory::PersonalBest => write!(f, "personal-best"),
            ToastCategory::Milestone => write!(f, "milestone"),
            ToastCategory::Info => write!(f, "info"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToastId(String);

impl ToastId {
    /// Millisecond timestamp plus a process-wide counter, so ids stay
    /// distinct even when many toasts are created in the same millisecond.
    fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = TOAST_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{millis}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a caller asks for. The queue assigns the id.
#[derive(Clone, Debug, PartialEq)]
pub struct ToastRequest {
    pub message: String,
    pub category: ToastCategory,
    pub duration: Option<Duration>,
}

impl ToastRequest {
    pub fn new(message: impl Into<String>, category: ToastCategory) -> Self {
        Self {
            message: message.into(),
            category,
            duration: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, ToastCategory::Info)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub id: ToastId,
    pub message: String,
    pub category: ToastCategory,
    pub duration: Duration,
}

/// Ordered list of visible toasts. Each toast removes itself once its
/// duration elapses; manual dismissal takes the same path.
#[derive(Clone)]
pub struct ToastQueue {
    store: Store<Vec<Toast>>,
    scope: TaskScope,
    default_duration: Duration,
}

impl ToastQueue {
    pub fn new(scope: TaskScope) -> Self {
        Self::with_default_duration(scope, Duration::from_millis(DEFAULT_TOAST_DURATION_MS))
    }

    pub fn with_default_duration(scope: TaskScope, default_duration: Duration) -> Self {
        Self {
            store: Store::new(Vec::new()),
            scope,
            default_duration,
        }
    }

    pub fn store(&self) -> &Store<Vec<Toast>> {
        &self.store
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.store.snapshot()
    }

    /// Append a toast and schedule its removal. Must run inside a tokio runtime.
    pub fn add_toast(&self, request: ToastRequest) -> ToastId {
        let toast = Toast {
            id: ToastId::generate(),
            message: request.message,
            category: request.category,
            duration: request.duration.unwrap_or(self.default_duration),
        };
        let id = toast.id.clone();
        let duration = toast.duration;
        debug!("Toast {} ({}): {}", id, toast.category, toast.message);
        self.store.update(|toasts| toasts.push(toast));

        let store = self.store.clone();
        let expired = id.clone();
        self.scope.schedule(duration, async move {
            remove_from(&store, &expired);
        });
        id
    }

    /// Remove a toast. Removing an unknown or already expired id does nothing.
    pub fn remove_toast(&self, id: &ToastId) {
        remove_from(&self.store, id);
    }
}

fn remove_from(store: &Store<Vec<Toast>>, id: &ToastId) {
    store.update(|toasts| toasts.retain(|t| &t.id != id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[tokio::test(start_paused = true)]
    async fn test_toast_expires_after_default_duration() {
        let queue = ToastQueue::new(TaskScope::new());
        queue.add_toast(ToastRequest::info("Upload complete"));
        assert_eq!(queue.toasts().len(), 1);

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(queue.toasts().len(), 1);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(queue.toasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_duration_and_ordering() {
        let queue = ToastQueue::new(TaskScope::new());
        let long = queue.add_toast(ToastRequest::info("first"));
        let short = queue.add_toast(
            ToastRequest::new("second", ToastCategory::Milestone)
                .with_duration(Duration::from_millis(1000)),
        );
        let ids: Vec<ToastId> = queue.toasts().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![long.clone(), short]);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        let ids: Vec<ToastId> = queue.toasts().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![long]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_dismissal_then_timer_is_noop() {
        let queue = ToastQueue::new(TaskScope::new());
        let first = queue.add_toast(ToastRequest::info("first"));
        queue.remove_toast(&first);
        assert!(queue.toasts().is_empty());

        let second = queue.add_toast(ToastRequest::info("second"));
        // the first toast's timer fires and must not touch the second one
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.toasts()[0].id, second);

        // unknown ids are ignored
        queue.remove_toast(&first);
        assert_eq!(queue.toasts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_teardown_stops_expiry() {
        let scope = TaskScope::new();
        let queue = ToastQueue::new(scope.clone());
        queue.add_toast(ToastRequest::info("sticky"));
        scope.shutdown();

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(queue.toasts().len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_toast_ids_are_pairwise_distinct(count in 1usize..200) {
            let ids: Vec<ToastId> = (0..count).map(|_| ToastId::generate()).collect();
            let unique: HashSet<&ToastId> = ids.iter().collect();
            prop_assert_eq!(unique.len(), count);
        }
    }
}
