//! On-open configuration surface: which `ValueBox`
//! backend to use and whether to eagerly compact a durable store at open
//! time.

use std::path::PathBuf;

/// Default compaction trigger: compact a durable store at open time once a
/// majority of its on-disk bytes are garbage.
pub const DEFAULT_COMPACTION_GARBAGE_RATIO_THRESHOLD: f64 = 0.5;

#[derive(Clone, Debug)]
pub enum Backend {
    /// An ephemeral, in-memory `ValueBox`. Nothing survives process exit.
    Memory,
    /// A durable, append-only-log-backed `ValueBox` rooted at `path`.
    Durable {
        path: PathBuf,
        compaction_garbage_ratio_threshold: f64,
    },
}

#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub backend: Backend,
}

impl OpenOptions {
    pub fn in_memory() -> Self {
        Self { backend: Backend::Memory }
    }

    pub fn durable(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Durable {
                path: path.into(),
                compaction_garbage_ratio_threshold: DEFAULT_COMPACTION_GARBAGE_RATIO_THRESHOLD,
            },
        }
    }

    pub fn with_compaction_garbage_ratio_threshold(mut self, threshold: f64) -> Self {
        if let Backend::Durable { compaction_garbage_ratio_threshold, .. } = &mut self.backend {
            *compaction_garbage_ratio_threshold = threshold;
        }
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::in_memory()
    }
}
