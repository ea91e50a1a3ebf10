pub mod retry;

pub use retry::{poll_until, retry_async, RetryPolicy};
