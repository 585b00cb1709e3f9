// ── Keyed entity stores ──
//
// One `UnaryStore` per cached resource type, owned by a `StoreRegistry`
// built at startup. Stream handlers write into stores; everything else
// reads from them and listens for changes.

mod listeners;
mod registry;
mod unary;

pub use listeners::Subscription;
pub use registry::StoreRegistry;
pub use unary::{Rollback, ScopedStore, SetOptions, StoreOptions, UnaryStore};

/// A record that knows its own store key.
pub trait Keyed {
    type Key;

    fn key(&self) -> Self::Key;
}
