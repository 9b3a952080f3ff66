//! Exactly-once release of native model handles.

use std::sync::Arc;

use crate::runtime::ModelRuntime;

/// Sole owner of a loaded model handle.
///
/// Every destruction path (explicit unload, fatal error, drop on teardown)
/// routes through [`HandleGuard::release`], which is idempotent. The state
/// machine guarantees release only ever happens from the ready or error
/// states, never concurrently with a dispatched step.
pub struct HandleGuard<R: ModelRuntime> {
    runtime: Arc<R>,
    handle: R::Handle,
    released: bool,
}

impl<R: ModelRuntime> HandleGuard<R> {
    pub(crate) fn new(runtime: Arc<R>, handle: R::Handle) -> Self {
        Self {
            runtime,
            handle,
            released: false,
        }
    }

    /// Release the native handle. Calling this twice is a no-op.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.runtime.release(&mut self.handle);
            tracing::debug!("model handle released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Borrow the runtime and the handle together for one generation.
    pub(crate) fn parts(&mut self) -> (&R, &mut R::Handle) {
        (&*self.runtime, &mut self.handle)
    }
}

impl<R: ModelRuntime> Drop for HandleGuard<R> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadConfig;
    use crate::runtime::{StubBehavior, StubRuntime};
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn loaded_guard() -> (HandleGuard<StubRuntime>, Arc<std::sync::atomic::AtomicUsize>) {
        let runtime = Arc::new(StubRuntime::new(StubBehavior {
            require_existing_path: false,
            ..Default::default()
        }));
        let counter = runtime.release_counter();
        let handle = runtime
            .load(Path::new("stub.bin"), &LoadConfig::default())
            .unwrap();
        (HandleGuard::new(runtime, handle), counter)
    }

    #[test]
    fn double_release_is_a_noop() {
        let (mut guard, counter) = loaded_guard();
        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_exactly_once() {
        let (guard, counter) = loaded_guard();
        drop(guard);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_after_explicit_release_does_not_double_free() {
        let (mut guard, counter) = loaded_guard();
        guard.release();
        drop(guard);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
