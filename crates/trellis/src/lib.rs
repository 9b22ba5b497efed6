//! A centralized state container with a single-rooted module tree.
//!
//! State lives in one JSON tree; the only way to change it is to commit a
//! mutation, and the only way to run async work against it is to dispatch an
//! action. Modules slice the tree into sub-states with their own handler
//! tables, optionally namespaced, registered at construction or at runtime.
//! Derived values (getters) are cached between commits, and a reactivity
//! layer injected at construction drives change notification.
//!
//! ```
//! use trellis::{ModuleSpec, Store};
//! use serde_json::json;
//!
//! let store = Store::new(
//!     ModuleSpec::new()
//!         .state(json!({ "count": 0 }))
//!         .mutation("increment", |state, _| {
//!             let n = state["count"].as_i64().unwrap_or(0);
//!             state["count"] = json!(n + 1);
//!         }),
//! )
//! .unwrap();
//!
//! store.commit("increment", None);
//! assert_eq!(store.state()["count"], json!(1));
//! ```

pub mod error;
pub mod module;
pub mod path;
pub mod reactive;
pub mod spec;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use path::ModulePath;
pub use reactive::{ReactiveRoot, Reactivity, TrackedReactivity, WatchOptions};
pub use spec::{ActionResult, ActionSpec, ModuleSpec};
pub use store::{
    ActionContext, ActionRecord, GetterScope, MutationRecord, RegisterOptions, Store,
    StoreBuilder, Subscription, WatchHandle,
};

pub use serde_json::Value;
