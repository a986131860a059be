use std::sync::Arc;

use ntex::web::HttpRequest;
use tracing::error;

use crate::pipeline::error::PipelineError;

/// Error surfaced by a listener or callback. Always caught and logged at the
/// point of invocation; never visible to the client.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Extension point observed at the start of every request. Listeners are
/// registered at configuration time and invoked in registration order; there
/// is no runtime registry to mutate.
pub trait RequestListener: Send + Sync {
    /// Called before the request is dispatched. Returning a callback opts
    /// into the request's completion signals.
    fn on_request(&self, req: &HttpRequest)
        -> Result<Option<Box<dyn RequestCallback>>, ListenerError>;
}

/// Per-request completion signals. `on_success` fires for responses the
/// pipeline produced itself (including client errors); `on_error` fires for
/// execution failures; `on_finally` always fires last.
pub trait RequestCallback: Send {
    fn on_success(&self, _req: &HttpRequest) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_error(&self, _req: &HttpRequest, _error: &PipelineError) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_finally(&self, _req: &HttpRequest) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// The configured listeners, fanned out with per-listener fault isolation: a
/// failing listener is logged and skipped, and the rest still run.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Arc<dyn RequestListener>>,
}

impl ListenerSet {
    pub fn new(listeners: Vec<Arc<dyn RequestListener>>) -> Self {
        Self { listeners }
    }

    pub fn on_request(&self, req: &HttpRequest) -> RequestCallbacks {
        let mut callbacks = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            match listener.on_request(req) {
                Ok(Some(callback)) => callbacks.push(callback),
                Ok(None) => {}
                Err(e) => error!("Error running request listener: {}", e),
            }
        }
        RequestCallbacks { callbacks }
    }
}

/// Callbacks collected from the listeners for one request.
pub struct RequestCallbacks {
    callbacks: Vec<Box<dyn RequestCallback>>,
}

impl RequestCallbacks {
    pub fn on_success(&self, req: &HttpRequest) {
        for callback in &self.callbacks {
            if let Err(e) = callback.on_success(req) {
                error!("Error running listener callback: {}", e);
            }
        }
    }

    pub fn on_error(&self, req: &HttpRequest, error: &PipelineError) {
        for callback in &self.callbacks {
            if let Err(e) = callback.on_error(req, error) {
                error!("Error running listener callback: {}", e);
            }
        }
    }

    pub fn on_finally(&self, req: &HttpRequest) {
        for callback in &self.callbacks {
            if let Err(e) = callback.on_finally(req) {
                error!("Error running listener callback: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ntex::web::test::TestRequest;

    use super::*;

    struct Recording {
        finished: Arc<AtomicUsize>,
    }

    impl RequestListener for Recording {
        fn on_request(
            &self,
            _req: &HttpRequest,
        ) -> Result<Option<Box<dyn RequestCallback>>, ListenerError> {
            Ok(Some(Box::new(RecordingCallback {
                finished: self.finished.clone(),
            })))
        }
    }

    struct RecordingCallback {
        finished: Arc<AtomicUsize>,
    }

    impl RequestCallback for RecordingCallback {
        fn on_finally(&self, _req: &HttpRequest) -> Result<(), ListenerError> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl RequestListener for Failing {
        fn on_request(
            &self,
            _req: &HttpRequest,
        ) -> Result<Option<Box<dyn RequestCallback>>, ListenerError> {
            Err(ListenerError("listener blew up".to_string()))
        }
    }

    #[test]
    fn a_failing_listener_does_not_stop_the_rest() {
        let finished = Arc::new(AtomicUsize::new(0));
        let listeners = ListenerSet::new(vec![
            Arc::new(Failing),
            Arc::new(Recording {
                finished: finished.clone(),
            }),
        ]);

        let req = TestRequest::with_uri("/graphql").to_http_request();
        let callbacks = listeners.on_request(&req);
        callbacks.on_success(&req);
        callbacks.on_finally(&req);

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
