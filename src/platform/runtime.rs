use std::fmt;
use std::future::Future;
use std::pin::{pin, Pin};
use std::time::Duration;

use futures::future::{select, Either};

/// Platform-independent helper to spawn an async task that runs in the background.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Platform-independent helper to spawn an async task that runs in the background.
///
/// Uses the ambient Tokio runtime when there is one; otherwise the task gets its own
/// short-lived current-thread runtime on a helper thread.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::{Builder, Handle};

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    std::thread::spawn(move || {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(future),
            Err(err) => log::warn!(target: "identity_link::runtime", "failed to build background runtime: {err}"),
        }
    });
}

/// Asynchronously waits for the provided duration in a platform-compatible way.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    sleep_impl(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_impl(duration: Duration) {
    use gloo_timers::future::sleep;
    sleep(duration).await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_impl(duration: Duration) {
    use tokio::time::sleep;
    sleep(duration).await;
}

/// Timer returned by [`start_timer`].
#[cfg(not(target_arch = "wasm32"))]
pub type Timer = Pin<Box<tokio::time::Sleep>>;

/// Timer returned by [`start_timer`].
#[cfg(target_arch = "wasm32")]
pub type Timer = Pin<Box<gloo_timers::future::TimeoutFuture>>;

/// Starts a timer now. Awaiting it later resolves once `duration` has passed since this
/// call, on a monotonic clock.
#[cfg(not(target_arch = "wasm32"))]
pub fn start_timer(duration: Duration) -> Timer {
    Box::pin(tokio::time::sleep(duration))
}

/// Starts a timer now. Awaiting it later resolves once `duration` has passed since this
/// call.
#[cfg(target_arch = "wasm32")]
pub fn start_timer(duration: Duration) -> Timer {
    Box::pin(gloo_timers::future::sleep(duration))
}

/// Returned by [`timeout`] when the deadline passes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {} ms elapsed", self.0.as_millis())
    }
}

impl std::error::Error for Elapsed {}

/// Races `future` against a timer. The losing future is dropped.
pub async fn timeout<F>(duration: Duration, future: F) -> Result<F::Output, Elapsed>
where
    F: Future,
{
    let future = pin!(future);
    let timer = pin!(sleep(duration));
    match select(future, timer).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(((), _)) => Err(Elapsed(duration)),
    }
}
