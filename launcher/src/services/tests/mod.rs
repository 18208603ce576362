//! Service-specific tests
//!
//! This module contains tests for the real service implementations.
//! Most of them spawn real processes or talk to local sockets.

mod discovery;

// Common test utilities for services
pub mod common {
    use shared::{Environment, EnvironmentBuilder, ServiceSpec};
    use std::path::Path;
    use std::time::Duration;

    /// Generous bound for polling a spawned process
    pub const PROCESS_SETTLE: Duration = Duration::from_secs(5);

    /// Environment inherited from the test runner, so PATH lookups work
    pub fn test_env() -> Environment {
        EnvironmentBuilder::from_current()
            .set("CL_SERVER_DIR", "/tmp/cl-launcher-test")
            .build()
            .expect("valid test environment")
    }

    /// `sh -c <script>` logging to `<log_dir>/<name>.log`
    pub fn shell_spec(name: &str, script: &str, log_dir: &Path) -> ServiceSpec {
        ServiceSpec::new(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            log_dir,
            test_env(),
            log_dir.join(format!("{name}.log")),
        )
        .expect("valid test spec")
    }

    /// A port nothing is listening on
    pub fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        listener.local_addr().expect("local addr").port()
    }
}
