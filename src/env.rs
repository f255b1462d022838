//! Runtime environment detection.
//!
//! A single source of truth for whether the process is running under test,
//! keyed off the `HAPCAN_BRIDGE_ENV` environment variable. Used by
//! [`crate::config::default_config_path`] to prefer a project-relative
//! config path over the platform config directory during tests.

/// Runtime environment for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Test environment - uses a project-relative config path.
    Test,
}

impl Environment {
    /// Detect current environment from `HAPCAN_BRIDGE_ENV`.
    #[must_use]
    pub fn current() -> Self {
        match std::env::var("HAPCAN_BRIDGE_ENV").as_deref() {
            Ok("test") => Self::Test,
            _ => Self::Production,
        }
    }

    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience function equivalent to `Environment::current().is_test()`.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
