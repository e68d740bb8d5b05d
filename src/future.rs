//! Future/callback calling convention.
//!
//! Every `*_async` operation returns a `ResultHandle` right away. The work
//! runs on the current tokio runtime and keeps running if the handle is
//! dropped; callbacks fire exactly once per handle, on success or failure.

use crate::core::{MapperError, Result};
use log::warn;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Result of an operation that has nothing to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Empty;

pub trait FutureCallback<T>: Send + Sync {
    fn on_success(&self, value: &T);

    fn on_failure(&self, error: &MapperError);
}

pub type Callbacks<T> = Vec<Arc<dyn FutureCallback<T>>>;

fn notify<T>(callbacks: &[Arc<dyn FutureCallback<T>>], result: &Result<T>) {
    for callback in callbacks {
        match result {
            Ok(value) => callback.on_success(value),
            Err(err) => callback.on_failure(err),
        }
    }
}

enum Inner<T> {
    Spawned(JoinHandle<Result<T>>),
    Failed(Option<MapperError>),
}

/// Handle on a spawned mapper operation; await it for the result.
pub struct ResultHandle<T> {
    inner: Inner<T>,
}

impl<T: Send + 'static> ResultHandle<T> {
    /// Spawns `future` on the current runtime. Without a runtime the handle
    /// completes immediately with an error, reported to the callbacks too.
    pub fn spawn<F>(future: F, callbacks: Callbacks<T>) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = runtime.spawn(async move {
                    let result = future.await;
                    notify(&callbacks, &result);
                    result
                });
                Self {
                    inner: Inner::Spawned(task),
                }
            }
            Err(err) => {
                warn!("no tokio runtime for async operation: {}", err);
                Self::failed(
                    MapperError::ExecutionError(format!("no async runtime: {}", err)),
                    &callbacks,
                )
            }
        }
    }

    /// A handle that has already failed with `error`.
    pub fn failed(error: MapperError, callbacks: &[Arc<dyn FutureCallback<T>>]) -> Self {
        let result = Err(error);
        notify(callbacks, &result);
        Self {
            inner: Inner::Failed(result.err()),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.inner {
            Inner::Spawned(task) => task.is_finished(),
            Inner::Failed(_) => true,
        }
    }
}

impl<T> Future for ResultHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Spawned(task) => Pin::new(task)
                .poll(cx)
                .map(|joined| joined.map_err(MapperError::from).and_then(|result| result)),
            Inner::Failed(error) => Poll::Ready(Err(error.take().unwrap_or_else(|| {
                MapperError::ExecutionError("result already taken".to_string())
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl FutureCallback<i64> for Recorder {
        fn on_success(&self, value: &i64) {
            self.events.lock().unwrap().push(format!("ok {}", value));
        }

        fn on_failure(&self, error: &MapperError) {
            self.events.lock().unwrap().push(format!("err {}", error));
        }
    }

    #[tokio::test]
    async fn test_success_fires_once() {
        let recorder = Arc::new(Recorder::default());
        let handle = ResultHandle::<i64>::spawn(async { Ok(42) }, vec![recorder.clone() as _]);
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["ok 42".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_fires_once() {
        let recorder = Arc::new(Recorder::default());
        let handle = ResultHandle::<i64>::spawn(
            async { Err(MapperError::Store("down".to_string())) },
            vec![recorder.clone() as _],
        );
        assert!(handle.await.is_err());
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("err"));
    }

    #[tokio::test]
    async fn test_callbacks_fire_without_awaiting() {
        let recorder = Arc::new(Recorder::default());
        drop(ResultHandle::<i64>::spawn(async { Ok(1) }, vec![recorder.clone() as _]));
        for _ in 0..100 {
            if !recorder.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_no_runtime_fails_immediately() {
        let recorder = Arc::new(Recorder::default());
        let handle = ResultHandle::<i64>::spawn(async { Ok(1) }, vec![recorder.clone() as _]);
        assert!(handle.is_finished());
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }
}
