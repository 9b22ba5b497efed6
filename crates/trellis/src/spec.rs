//! User-authored module definitions.
//!
//! A [`ModuleSpec`] describes one module: its initial state, its handler
//! tables, and its child modules. Specs are assembled with the builder
//! methods and handed to the store (or to `register_module` / `hot_update`)
//! wholesale; the store never mutates a spec after construction.

use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use must_future::MustBoxFuture;
use serde_json::Value;

use crate::store::{ActionContext, GetterScope};

/// A mutation handler: synchronously updates the module's local state.
///
/// Mutations are infallible by contract; a panicking handler aborts the
/// commit and propagates to the caller.
pub type MutationFn = Arc<dyn Fn(&mut Value, Option<&Value>) + Send + Sync>;

/// A getter handler: `(local state, local getters, root state, root getters)`.
pub type GetterFn =
    Arc<dyn Fn(&Value, &GetterScope<'_>, &Value, &GetterScope<'_>) -> Value + Send + Sync>;

/// What an action resolves to.
pub type ActionResult = anyhow::Result<Value>;

/// An action handler: receives a context bound to its module's namespace and
/// returns an awaitable.
pub type ActionFn =
    Arc<dyn Fn(ActionContext, Option<Value>) -> MustBoxFuture<'static, ActionResult> + Send + Sync>;

/// An action declaration: the handler plus its registration scope.
///
/// By default an action registers under its module's namespace. A root-scoped
/// action registers under its bare name regardless of how deeply its module
/// is nested.
#[derive(Clone)]
pub struct ActionSpec {
    pub(crate) handler: ActionFn,
    pub(crate) root: bool,
}

impl ActionSpec {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |ctx, payload| MustBoxFuture::new(f(ctx, payload))),
            root: false,
        }
    }

    /// Register under the bare action name instead of the module namespace.
    pub fn root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }
}

/// The initial state of a module: an eager value or a factory invoked once
/// when the module node is constructed.
#[derive(Clone)]
pub(crate) enum StateInit {
    Eager(Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl StateInit {
    pub(crate) fn resolve(&self) -> Value {
        match self {
            StateInit::Eager(v) => v.clone(),
            StateInit::Factory(f) => f(),
        }
    }
}

/// One module definition: state, handler tables, child modules.
#[derive(Clone, Default)]
pub struct ModuleSpec {
    pub(crate) state: Option<StateInit>,
    pub(crate) namespaced: bool,
    pub(crate) mutations: IndexMap<String, MutationFn>,
    pub(crate) actions: IndexMap<String, ActionSpec>,
    pub(crate) getters: IndexMap<String, GetterFn>,
    pub(crate) modules: IndexMap<String, ModuleSpec>,
}

impl ModuleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope this module's mutation/action/getter keys under its own key.
    pub fn namespaced(mut self, namespaced: bool) -> Self {
        self.namespaced = namespaced;
        self
    }

    /// Initial state as a plain value.
    pub fn state(mut self, state: Value) -> Self {
        self.state = Some(StateInit::Eager(state));
        self
    }

    /// Initial state produced by a factory, invoked once per module node.
    pub fn state_with(mut self, f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        self.state = Some(StateInit::Factory(Arc::new(f)));
        self
    }

    pub fn mutation(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&mut Value, Option<&Value>) + Send + Sync + 'static,
    ) -> Self {
        self.mutations.insert(name.into(), Arc::new(f));
        self
    }

    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActionContext, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.actions.insert(name.into(), ActionSpec::new(f));
        self
    }

    /// An action with an explicit [`ActionSpec`], e.g. a root-scoped one.
    pub fn action_spec(mut self, name: impl Into<String>, spec: ActionSpec) -> Self {
        self.actions.insert(name.into(), spec);
        self
    }

    pub fn getter(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &GetterScope<'_>, &Value, &GetterScope<'_>) -> Value
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(f));
        self
    }

    /// Declare a child module under `key`.
    pub fn module(mut self, key: impl Into<String>, spec: ModuleSpec) -> Self {
        self.modules.insert(key.into(), spec);
        self
    }
}
