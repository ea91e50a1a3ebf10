use httpmock::MockServer;

use crate::auth::api::RestAuthBackend;
use crate::auth::config::BackendConfig;

pub const TEST_API_KEY: &str = "test-anon-key";

/// Start a fresh `httpmock::MockServer` instance for use in unit or integration tests.
pub fn start_mock_server() -> MockServer {
    MockServer::start()
}

/// REST backend whose auth and data APIs live under `/auth/v1` and `/rest/v1` on `server`.
pub fn rest_backend(server: &MockServer) -> RestAuthBackend {
    RestAuthBackend::new(BackendConfig::new(
        server.url("/auth/v1"),
        server.url("/rest/v1"),
        TEST_API_KEY,
    ))
}
