// ── Debounced batch retrieval ──
//
// Concurrent reads for overlapping key sets arriving inside one debounce
// window collapse into a single bulk fetch; each caller gets back its own
// keys in its own order and cardinality.

mod debounce;
mod fetcher;

pub use debounce::{DebouncedRetriever, RetrieverOptions};
pub use fetcher::{Fetcher, http_fetcher};

/// What one `retrieve` call resolves to, shaped like its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved<V> {
    /// A scalar was requested; `None` if the fetch did not return it.
    Single(Option<V>),
    /// A list was requested; missing keys are omitted.
    Many(Vec<V>),
}

impl<V> Retrieved<V> {
    pub fn into_single(self) -> Option<V> {
        match self {
            Self::Single(value) => value,
            Self::Many(values) => values.into_iter().next(),
        }
    }

    pub fn into_many(self) -> Vec<V> {
        match self {
            Self::Single(value) => value.into_iter().collect(),
            Self::Many(values) => values,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}
