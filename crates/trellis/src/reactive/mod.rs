//! The reactivity capability the store is installed against.
//!
//! The store never observes state changes itself: it delegates caching of
//! derived values, deep change detection, and disposal scheduling to an
//! implementation of these traits, injected at construction. A
//! self-contained implementation lives in [`tracked`]; a host UI framework
//! supplies its own to make the state tree drive its views.

pub mod tracked;

pub use tracked::TrackedReactivity;

use std::sync::Arc;

use serde_json::Value;

/// Computes a derived value from the current root state.
pub type DerivedFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Projects the watched slice out of the root state.
pub type SelectorFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Invoked with `(new, old)` when a watched selection changes.
pub type ChangeFn = Box<dyn Fn(&Value, &Value) + Send + Sync>;

/// Identifies one deep watch within a root cell.
pub type WatchId = u64;

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Fire the change callback at write time rather than on quiescence.
    pub sync: bool,
}

/// Factory and scheduler for reactive root cells.
pub trait Reactivity: Send + Sync {
    fn make_reactive_root(&self, initial: Value) -> Arc<dyn ReactiveRoot>;

    /// Defer `f` until the current update cycle settles. Used to dispose a
    /// superseded root cell without disrupting in-flight observers.
    fn schedule_on_quiescence(&self, f: Box<dyn FnOnce() + Send>);
}

/// One reactive cell wrapping the whole state tree.
pub trait ReactiveRoot: Send + Sync {
    /// A clone of the current state tree.
    fn snapshot(&self) -> Value;

    /// Swap the backing value wholesale.
    fn replace(&self, next: Value);

    /// Apply a mutation to the state tree and notify watchers.
    fn mutate(&self, f: &mut dyn FnMut(&mut Value));

    /// Reactive-aware structural attach of a child value under
    /// `parent_path` + `key`.
    fn attach_property(&self, parent_path: &[String], key: &str, child: Value);

    /// Reactive-aware structural removal.
    fn detach_property(&self, parent_path: &[String], key: &str);

    /// Register a named derived value, lazily cached against the state
    /// version.
    fn define_derived(&self, name: &str, compute: DerivedFn);

    /// Evaluate a derived value, recomputing only if the state has changed
    /// since the cached evaluation. `None` if no such derived value exists.
    fn derived(&self, name: &str) -> Option<Value>;

    /// Observe a selection of the state tree for deep changes.
    fn watch_deep(&self, selector: SelectorFn, on_change: ChangeFn, opts: WatchOptions)
        -> WatchId;

    fn unwatch(&self, id: WatchId);

    /// Drop all cached derived values so the next read recomputes.
    fn invalidate(&self);

    /// Tear down derived values and watchers ahead of disposal. Reads keep
    /// working; nothing fires afterward.
    fn deactivate(&self);
}
