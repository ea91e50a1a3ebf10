//! Test utilities shared across crate-level unit tests.

pub mod fakes;
pub mod fixtures;
#[cfg(not(target_arch = "wasm32"))]
pub mod http;

pub use fakes::{FakeAccount, FakeBackend, FakeSdkClient, FakeSdkHost};
pub use fixtures::{sample_session, wait_until};
#[cfg(not(target_arch = "wasm32"))]
pub use http::{rest_backend, start_mock_server, TEST_API_KEY};
