use log::warn;

/// Allocation bytes a context may accumulate before its first collection.
pub const DEFAULT_GC_THRESHOLD: usize = 1024 * 1024;

/// Evaluation stack entries allowed per context.
pub const DEFAULT_STACK_LIMIT: usize = 100_000;

/// Nested evaluations, reads and prints allowed per context. Each level
/// costs native stack, so this stays far below what the interpreter thread
/// can hold.
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

/// Tunables for a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Initial collection threshold of every new context, in bytes.
    pub gc_threshold: usize,
    /// Hard cap on bytes held by all contexts together. Exceeding it after a
    /// collection raises the out-of-memory error.
    pub heap_limit: Option<usize>,
    pub stack_limit: usize,
    /// Deepest nesting of `eval`, list reading and list printing before
    /// "Stack overflow" is raised.
    pub max_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            heap_limit: None,
            stack_limit: DEFAULT_STACK_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CINDER_GC_THRESHOLD`, `CINDER_HEAP_LIMIT`,
    /// `CINDER_STACK_LIMIT` and `CINDER_MAX_DEPTH`. Unparseable values are
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = RuntimeConfig::default();
        if let Some(n) = read_size(&lookup, "CINDER_GC_THRESHOLD") {
            config.gc_threshold = n;
        }
        if let Some(n) = read_size(&lookup, "CINDER_HEAP_LIMIT") {
            config.heap_limit = Some(n);
        }
        if let Some(n) = read_size(&lookup, "CINDER_STACK_LIMIT") {
            config.stack_limit = n;
        }
        if let Some(n) = read_size(&lookup, "CINDER_MAX_DEPTH") {
            config.max_depth = n;
        }
        config
    }
}

fn read_size(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!("ignoring {}={:?}: expected a positive integer", key, raw);
            None
        }
    }
}
