use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::pipeline::execution_request::OperationRequest;

/// Error reported by the execution engine. The gateway treats the engine as
/// an opaque capability and never inspects failures beyond their message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of invoking the engine, branched on as a closed tag set instead of
/// inspecting the runtime shape of the returned value.
pub enum ExecutionOutcome {
    /// A finite result, serialized to a JSON response body.
    Single(serde_json::Value),
    /// A subscription: a lazy, possibly infinite sequence of results,
    /// delivered incrementally as Server-Sent Events.
    Stream(SubscriptionSource),
}

/// A subscription produced by the engine. Items arrive in emission order,
/// possibly on an engine-owned task; `handle` is the single shared
/// cancellation seam between that task and the request handler.
pub struct SubscriptionSource {
    pub items: BoxStream<'static, Result<serde_json::Value, EngineError>>,
    pub handle: SubscriptionHandle,
}

#[async_trait]
pub trait GraphQLEngine: Send + Sync {
    async fn execute(&self, request: OperationRequest) -> Result<ExecutionOutcome, EngineError>;
}

#[derive(Default)]
enum CancelSlot {
    #[default]
    Unarmed,
    /// Cancellation requested before the action was armed; fires on arm.
    PendingCancel,
    Armed(Box<dyn FnOnce() + Send>),
    Cancelled,
}

/// Cancellation slot shared between the request handler and the engine's
/// producer task.
///
/// A timeout or disconnect can race subscription establishment, so the
/// cancel action is an atomically-set, check-and-cancel-on-set slot: a
/// cancel arriving before `arm` is deferred and fires the moment the action
/// is installed, and cancelling more than once is a no-op. Only the first
/// armed action is kept.
#[derive(Clone, Default)]
pub struct SubscriptionHandle {
    slot: Arc<Mutex<CancelSlot>>,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the upstream cancel action. If a cancel request is already
    /// pending, the action runs immediately (outside the lock).
    pub fn arm(&self, cancel: impl FnOnce() + Send + 'static) {
        let deferred = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::take(&mut *slot) {
                CancelSlot::Unarmed => {
                    *slot = CancelSlot::Armed(Box::new(cancel));
                    None
                }
                CancelSlot::PendingCancel => {
                    *slot = CancelSlot::Cancelled;
                    Some(Box::new(cancel) as Box<dyn FnOnce() + Send>)
                }
                armed @ CancelSlot::Armed(_) => {
                    // first arm wins
                    *slot = armed;
                    None
                }
                CancelSlot::Cancelled => {
                    *slot = CancelSlot::Cancelled;
                    None
                }
            }
        };

        if let Some(cancel) = deferred {
            cancel();
        }
    }

    /// Cancels the upstream subscription. Safe to call from any thread and
    /// from multiple termination paths; only the first call has an effect.
    pub fn cancel(&self) {
        let action = {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::take(&mut *slot) {
                CancelSlot::Unarmed => {
                    *slot = CancelSlot::PendingCancel;
                    None
                }
                CancelSlot::Armed(cancel) => {
                    *slot = CancelSlot::Cancelled;
                    Some(cancel)
                }
                other => {
                    *slot = other;
                    None
                }
            }
        };

        if let Some(cancel) = action {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            *self.slot.lock().unwrap_or_else(|e| e.into_inner()),
            CancelSlot::PendingCancel | CancelSlot::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_handle() -> (SubscriptionHandle, Arc<AtomicUsize>) {
        let handle = SubscriptionHandle::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        handle.arm(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handle, fired)
    }

    #[test]
    fn cancel_fires_armed_action_once() {
        let (handle, fired) = counting_handle();
        handle.cancel();
        handle.cancel();
        handle.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn cancel_before_arm_is_deferred() {
        let handle = SubscriptionHandle::new();
        handle.cancel();
        assert!(handle.is_cancelled());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        handle.arm(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // a later cancel must not fire anything again
        handle.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_arm_is_ignored() {
        let (handle, fired) = counting_handle();
        let other = Arc::new(AtomicUsize::new(0));
        let counter = other.clone();
        handle.arm(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unarmed_handle_is_not_cancelled() {
        let handle = SubscriptionHandle::new();
        assert!(!handle.is_cancelled());
    }
}
