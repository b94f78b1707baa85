use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// Holds at most one in-flight scan. Callers arriving while a scan runs await the same
/// shared future instead of starting another one.
pub(crate) struct ScanCoalescer<T: Clone> {
    inflight: Mutex<Option<Shared<BoxFuture<'static, T>>>>,
}

impl<T> ScanCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    /// Join the running scan, or start one with `start` when none is running.
    pub(crate) async fn run<F>(&self, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let scan = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(running) => running.clone(),
                None => {
                    let scan = start().shared();
                    *slot = Some(scan.clone());
                    scan
                }
            }
        };

        let output = scan.clone().await;

        let mut slot = self.inflight.lock();
        if slot.as_ref().is_some_and(|running| running.ptr_eq(&scan)) {
            *slot = None;
        }
        output
    }

    pub(crate) fn is_running(&self) -> bool {
        self.inflight.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn delayed_scan(counter: Arc<AtomicUsize>) -> BoxFuture<'static, usize> {
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            n
        }
        .boxed()
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let coalescer = ScanCoalescer::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            coalescer.run(|| delayed_scan(counter.clone())),
            coalescer.run(|| delayed_scan(counter.clone())),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert!(!coalescer.is_running());
    }

    #[tokio::test]
    async fn sequential_callers_run_again() {
        let coalescer = ScanCoalescer::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert_eq!(coalescer.run(|| delayed_scan(counter.clone())).await, 1);
        assert_eq!(coalescer.run(|| delayed_scan(counter.clone())).await, 2);
    }
}
