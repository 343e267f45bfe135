//! Environment-driven configuration, following the `RuntimeConfig::from_env` pattern
//! used elsewhere in this crate's lineage: typed defaults, overridden by environment
//! variables, with a logged warning (rather than a hard failure) on an unparsable
//! override.

use std::env;

const DEFAULT_FIBRE_INIT_SIZE: usize = 4096;
const DEFAULT_ASYNC_STACK_SIZE: usize = 4096;
const DEFAULT_STEAL_ATTEMPTS: u32 = 64;

#[derive(Debug, Clone)]
pub struct Config {
    /// Initial size, in bytes, of a worker's first stacklet (`LF_FIBRE_INIT_SIZE`).
    pub fibre_init_size: usize,
    /// Legacy single-segment async stack size (`LF_ASYNC_STACK_SIZE`); only consulted
    /// when `legacy_single_segment` is set, kept for environment-surface fidelity.
    pub async_stack_size: usize,
    pub legacy_single_segment: bool,
    /// Whether a user task error is eagerly logged the moment it is first observed
    /// (`LF_COMPILER_EXCEPTIONS`, repurposed here since Rust has no exceptions to
    /// toggle at build time).
    pub eager_error_logging: bool,
    /// How many steal attempts a worker makes across its peers before parking.
    pub steal_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fibre_init_size: DEFAULT_FIBRE_INIT_SIZE,
            async_stack_size: DEFAULT_ASYNC_STACK_SIZE,
            legacy_single_segment: false,
            eager_error_logging: false,
            steal_attempts: DEFAULT_STEAL_ATTEMPTS,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_env("LF_FIBRE_INIT_SIZE") {
            config.fibre_init_size = v;
        }
        if let Ok(raw) = env::var("LF_ASYNC_STACK_SIZE") {
            match raw.parse() {
                Ok(v) => {
                    config.async_stack_size = v;
                    config.legacy_single_segment = true;
                }
                Err(_) => {
                    tracing::warn!(value = %raw, "LF_ASYNC_STACK_SIZE is not a valid integer, ignoring");
                }
            }
        }
        if let Ok(raw) = env::var("LF_COMPILER_EXCEPTIONS") {
            config.eager_error_logging = matches!(raw.as_str(), "1" | "true" | "TRUE" | "yes");
        }

        config
    }
}

fn parse_env(name: &str) -> Option<usize> {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "invalid environment override, using default");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.fibre_init_size, DEFAULT_FIBRE_INIT_SIZE);
        assert!(!config.legacy_single_segment);
    }
}
