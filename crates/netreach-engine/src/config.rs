//! Configuration for the reachability engine.

use netreach_core::ResolveOptions;
use netreach_graph::TopologyInference;
use serde::Deserialize;

use crate::error::Result;

/// Engine configuration.
///
/// Loaded from the `[engine]` section of `netreach.toml` or
/// `NETREACH_ENGINE__` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// How links between devices are inferred (default: shared_subnet).
    #[serde(default)]
    pub topology: TopologyInference,

    /// Resolve each device's books on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel_resolution: bool,

    /// Provide the vendor default books (`any`, `any-tcp`, ...).
    #[serde(default = "default_true")]
    pub builtin_books: bool,
}

impl EngineConfig {
    /// Load from `<file_prefix>.{toml,json,...}` (optional) layered under
    /// the environment. A missing `[engine]` section yields defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("NETREACH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<EngineConfig>("engine") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(EngineConfig::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            builtin_books: self.builtin_books,
            parallel: self.parallel_resolution,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topology: TopologyInference::default(),
            parallel_resolution: default_true(),
            builtin_books: default_true(),
        }
    }
}
