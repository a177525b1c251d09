//! Runtime configuration for [`EcsManager`](crate::engine::manager::EcsManager).
//!
//! Configuration is a plain value handed to the manager at construction.
//! Every field has a default, and builder-style setters allow overriding
//! individual knobs:
//!
//! ```ignore
//! let config = EcsConfig::default()
//!     .with_verbosity(Verbosity::Verbose)
//!     .with_cycle_policy(CyclePolicy::Reject);
//! let mut ecs = EcsManager::new(config);
//! ```

use crate::engine::types::ArchetypeChunkSize;

/// How chatty the engine is on the `info` channel.
///
/// Errors and warnings are always emitted; `Quiet` only suppresses
/// informational registration and flush summaries.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only warnings and errors.
    #[default]
    Quiet,
    /// Also report registrations, archetype creation and flush statistics.
    Verbose,
}

/// What the dependency sort does when it finds a cycle.
///
/// Both policies log every cycle with its full path.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CyclePolicy {
    /// Break the offending edge and keep going; the result is still a total order.
    #[default]
    Warn,
    /// Report the cycle as an error and keep the previous order.
    Reject,
}

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EcsConfig {
    /// Informational logging level.
    pub verbosity: Verbosity,

    /// Chunk size used by templates that do not specify one.
    pub default_chunk_size: ArchetypeChunkSize,

    /// Policy applied when `before`/`after` constraints form a cycle.
    pub cycle_policy: CyclePolicy,

    /// Archetypes with at least this many rows compare tracked columns in parallel.
    pub parallel_tracking_min_rows: usize,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Quiet,
            default_chunk_size: ArchetypeChunkSize::Thousands,
            cycle_policy: CyclePolicy::Warn,
            parallel_tracking_min_rows: 4096,
        }
    }
}

impl EcsConfig {
    /// Sets the informational logging level.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Sets the chunk size used when a template does not pick one.
    pub fn with_default_chunk_size(mut self, chunk_size: ArchetypeChunkSize) -> Self {
        self.default_chunk_size = chunk_size;
        self
    }

    /// Sets the scheduling cycle policy.
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Sets the row threshold for parallel tracking comparisons.
    pub fn with_parallel_tracking_min_rows(mut self, rows: usize) -> Self {
        self.parallel_tracking_min_rows = rows;
        self
    }

    /// Returns `true` when informational messages should be emitted.
    #[inline]
    pub fn is_verbose(&self) -> bool {
        self.verbosity == Verbosity::Verbose
    }
}
