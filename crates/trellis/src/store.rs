//! The store: installation of the module tree, commit/dispatch routing,
//! subscribers, watches, and dynamic module lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use must_future::MustBoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::module::{ModuleCollection, ModuleContext};
use crate::path::{state_at, state_at_mut, ModulePath};
use crate::reactive::{
    DerivedFn, Reactivity, ReactiveRoot, TrackedReactivity, WatchOptions,
};
use crate::spec::{ActionResult, ModuleSpec};

/// What a mutation subscriber receives alongside the post-commit state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MutationRecord {
    #[serde(rename = "type")]
    pub ty: String,
    pub payload: Option<Value>,
}

/// What an action subscriber receives before the handlers run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ActionRecord {
    #[serde(rename = "type")]
    pub ty: String,
    pub payload: Option<Value>,
}

pub type SubscriberFn = dyn Fn(&MutationRecord, &Value) + Send + Sync;
pub type ActionSubscriberFn = dyn Fn(&ActionRecord, &Value) + Send + Sync;

/// A registered mutation handler, bound to its module's place in the tree.
type MutationEntry = Arc<dyn Fn(&mut Value, Option<&Value>) + Send + Sync>;
/// A registered action handler, bound to its module's local context.
type ActionEntry =
    Arc<dyn Fn(Option<Value>) -> MustBoxFuture<'static, ActionResult> + Send + Sync>;

type StrictHook = Arc<dyn Fn(&str) + Send + Sync>;
type ActionErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Options for [`Store::register_module`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Keep the live state already present at the path instead of attaching
    /// the spec's initial state.
    pub preserve_state: bool,
}

/// Namespace-scoped getter lookup, handed to getter handlers and watch
/// selectors. `get("fullName")` inside a namespaced module resolves
/// `"cart/fullName"`; on a root scope it resolves the bare key.
pub struct GetterScope<'a> {
    inner: &'a StoreInner,
    namespace: &'a str,
}

impl GetterScope<'_> {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.getter_value(&format!("{}{}", self.namespace, name))
    }
}

/// The context an action handler runs with: namespaced commit/dispatch plus
/// access to local and root state and getters.
#[derive(Clone)]
pub struct ActionContext {
    store: Store,
    namespace: String,
    path: ModulePath,
}

impl ActionContext {
    /// The full store, for operations outside the module's scope.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Commit a mutation under this module's namespace.
    pub fn commit(&self, ty: &str, payload: Option<Value>) {
        self.store.commit(&self.scoped(ty), payload);
    }

    /// Commit an unprefixed (root-level) mutation type.
    pub fn commit_root(&self, ty: &str, payload: Option<Value>) {
        self.store.commit(ty, payload);
    }

    /// Dispatch an action under this module's namespace.
    pub fn dispatch(&self, ty: &str, payload: Option<Value>) -> MustBoxFuture<'static, ActionResult> {
        self.store.dispatch(&self.scoped(ty), payload)
    }

    /// Dispatch an unprefixed (root-level) action type.
    pub fn dispatch_root(
        &self,
        ty: &str,
        payload: Option<Value>,
    ) -> MustBoxFuture<'static, ActionResult> {
        self.store.dispatch(ty, payload)
    }

    /// Snapshot of this module's own sub-state.
    pub fn state(&self) -> Value {
        let root = self.store.inner.root_cell().snapshot();
        state_at(&root, &self.path).cloned().unwrap_or(Value::Null)
    }

    /// Snapshot of the whole state tree.
    pub fn root_state(&self) -> Value {
        self.store.inner.root_cell().snapshot()
    }

    /// A getter local to this module's namespace.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.store.inner.getter_value(&self.scoped(name))
    }

    /// A getter by its fully-namespaced key.
    pub fn root_getter(&self, name: &str) -> Option<Value> {
        self.store.inner.getter_value(name)
    }

    fn scoped(&self, ty: &str) -> String {
        format!("{}{}", self.namespace, ty)
    }
}

enum SubscriptionTarget {
    Mutation(Weak<SubscriberFn>),
    Action(Weak<ActionSubscriberFn>),
}

/// Handle returned by [`Store::subscribe`] / [`Store::subscribe_action`].
/// Dropping it does not unsubscribe; calling [`unsubscribe`][Self::unsubscribe]
/// twice is safe.
pub struct Subscription {
    inner: Weak<StoreInner>,
    target: SubscriptionTarget,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match &self.target {
            SubscriptionTarget::Mutation(weak) => {
                if let Some(f) = weak.upgrade() {
                    inner.subscribers.write().retain(|g| !Arc::ptr_eq(g, &f));
                }
            }
            SubscriptionTarget::Action(weak) => {
                if let Some(f) = weak.upgrade() {
                    inner
                        .action_subscribers
                        .write()
                        .retain(|g| !Arc::ptr_eq(g, &f));
                }
            }
        }
    }
}

struct UserWatch {
    id: u64,
    selector: Arc<dyn Fn(&Value, &GetterScope<'_>) -> Value + Send + Sync>,
    callback: Arc<dyn Fn(&Value, &Value) + Send + Sync>,
    sync: bool,
    /// The watch id within the currently-installed root cell. Refreshed each
    /// time the reactive view is rebuilt.
    cell_watch: Mutex<Option<u64>>,
}

/// Handle returned by [`Store::watch`].
pub struct WatchHandle {
    inner: Weak<StoreInner>,
    id: u64,
}

impl WatchHandle {
    pub fn stop(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let removed = {
            let mut watches = inner.watches.write();
            match watches.iter().position(|w| w.id == self.id) {
                Some(pos) => Some(watches.remove(pos)),
                None => None,
            }
        };
        if let Some(watch) = removed {
            if let Some(cell_id) = *watch.cell_watch.lock() {
                inner.root_cell().unwatch(cell_id);
            }
        }
    }
}

pub(crate) struct StoreInner {
    modules: RwLock<ModuleCollection>,
    mutations: RwLock<HashMap<String, Vec<MutationEntry>>>,
    actions: RwLock<HashMap<String, Vec<ActionEntry>>>,
    wrapped_getters: RwLock<HashMap<String, DerivedFn>>,
    namespace_map: RwLock<HashMap<String, ModulePath>>,
    root: RwLock<Arc<dyn ReactiveRoot>>,
    reactivity: Arc<dyn Reactivity>,
    /// True only inside a `with_commit` scope. Advisory, not a lock: strict
    /// mode uses it to flag writes arriving outside any mutation.
    committing: AtomicBool,
    strict: bool,
    subscribers: RwLock<Vec<Arc<SubscriberFn>>>,
    action_subscribers: RwLock<Vec<Arc<ActionSubscriberFn>>>,
    watches: RwLock<Vec<Arc<UserWatch>>>,
    next_watch_id: AtomicU64,
    on_strict_violation: Option<StrictHook>,
    on_action_error: Option<ActionErrorHook>,
}

impl StoreInner {
    fn root_cell(&self) -> Arc<dyn ReactiveRoot> {
        self.root.read().clone()
    }

    /// Run `f` with the committing guard raised, restoring the previous
    /// value afterward so commit scopes nest.
    fn with_commit<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = self.committing.swap(true, Ordering::SeqCst);
        let result = f();
        self.committing.store(prev, Ordering::SeqCst);
        result
    }

    fn getter_value(&self, key: &str) -> Option<Value> {
        let value = self.root_cell().derived(key);
        if value.is_none() {
            tracing::debug!(key, "no getter registered under this key");
        }
        value
    }

    fn report_strict_violation(&self) {
        const MSG: &str =
            "state mutated outside of a commit scope; route changes through a mutation handler";
        tracing::error!("{}", MSG);
        match &self.on_strict_violation {
            Some(hook) => hook(MSG),
            None if cfg!(debug_assertions) => panic!("{MSG}"),
            None => {}
        }
    }
}

/// Builds a [`Store`] from a root [`ModuleSpec`] plus store-wide options.
pub struct StoreBuilder {
    root_spec: ModuleSpec,
    strict: bool,
    reactivity: Option<Arc<dyn Reactivity>>,
    on_strict_violation: Option<StrictHook>,
    on_action_error: Option<ActionErrorHook>,
}

impl StoreBuilder {
    pub fn new(root_spec: ModuleSpec) -> Self {
        Self {
            root_spec,
            strict: false,
            reactivity: None,
            on_strict_violation: None,
            on_action_error: None,
        }
    }

    /// Flag any state write arriving outside a commit scope. Leave disabled
    /// in production deployments; the check re-evaluates the whole tree on
    /// every write.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Inject the host's reactivity layer. Defaults to the bundled
    /// [`TrackedReactivity`].
    pub fn reactivity(mut self, reactivity: Arc<dyn Reactivity>) -> Self {
        self.reactivity = Some(reactivity);
        self
    }

    /// Override the strict-violation report. Without a hook, violations
    /// panic in debug builds and only log in release builds.
    pub fn on_strict_violation(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_strict_violation = Some(Arc::new(f));
        self
    }

    /// Observe action failures before they propagate to the dispatcher.
    pub fn on_action_error(mut self, f: impl Fn(&anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_action_error = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> StoreResult<Store> {
        let modules = ModuleCollection::new(self.root_spec)?;
        let reactivity = self
            .reactivity
            .unwrap_or_else(|| TrackedReactivity::new() as Arc<dyn Reactivity>);
        let bootstrap = reactivity.make_reactive_root(modules.root_state());
        let store = Store {
            inner: Arc::new(StoreInner {
                modules: RwLock::new(modules),
                mutations: RwLock::new(HashMap::new()),
                actions: RwLock::new(HashMap::new()),
                wrapped_getters: RwLock::new(HashMap::new()),
                namespace_map: RwLock::new(HashMap::new()),
                root: RwLock::new(bootstrap),
                reactivity,
                committing: AtomicBool::new(false),
                strict: self.strict,
                subscribers: RwLock::new(Vec::new()),
                action_subscribers: RwLock::new(Vec::new()),
                watches: RwLock::new(Vec::new()),
                next_watch_id: AtomicU64::new(0),
                on_strict_violation: self.on_strict_violation,
                on_action_error: self.on_action_error,
            }),
        };
        store.install_module(&ModulePath::root(), false, false)?;
        let state = store.inner.root_cell().snapshot();
        store.reset_store_vm(state, false);
        Ok(store)
    }
}

/// The state container. Cheap to clone; clones share one store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// A store with default options. See [`StoreBuilder`] for the rest.
    pub fn new(root_spec: ModuleSpec) -> StoreResult<Self> {
        StoreBuilder::new(root_spec).build()
    }

    pub fn builder(root_spec: ModuleSpec) -> StoreBuilder {
        StoreBuilder::new(root_spec)
    }

    /// Snapshot of the whole state tree.
    pub fn state(&self) -> Value {
        self.inner.root_cell().snapshot()
    }

    /// Evaluate a getter by its fully-namespaced key. Cached between
    /// commits; `None` if no getter is registered under the key.
    pub fn getter(&self, key: &str) -> Option<Value> {
        self.inner.getter_value(key)
    }

    /// Whether a namespaced module is registered under this namespace
    /// prefix (e.g. `"cart/"`).
    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.inner.namespace_map.read().contains_key(namespace)
    }

    /// Apply a mutation: every handler registered under `ty`, in
    /// registration order, inside one commit scope; then notify subscribers.
    /// An unknown type is reported and ignored.
    pub fn commit(&self, ty: &str, payload: Option<Value>) {
        let entries = self.inner.mutations.read().get(ty).cloned();
        let entries = match entries {
            Some(entries) if !entries.is_empty() => entries,
            _ => {
                tracing::error!(ty, "unknown mutation type");
                return;
            }
        };
        let root = self.inner.root_cell();
        self.inner.with_commit(|| {
            root.mutate(&mut |state| {
                for entry in &entries {
                    entry(state, payload.as_ref());
                }
            });
        });
        let subscribers: Vec<_> = self.inner.subscribers.read().clone();
        if !subscribers.is_empty() {
            let record = MutationRecord {
                ty: ty.to_string(),
                payload,
            };
            let state = root.snapshot();
            for subscriber in subscribers {
                subscriber(&record, &state);
            }
        }
    }

    /// Object-style commit: `payload` carries its own `"type"` field and
    /// becomes the payload wholesale.
    pub fn commit_value(&self, payload: Value) -> StoreResult<()> {
        let ty = extract_type(&payload)?;
        self.commit(&ty, Some(payload));
        Ok(())
    }

    /// Run the action(s) registered under `ty`. Subscribers are notified
    /// before the handlers start. One handler resolves to its own result;
    /// several resolve jointly once all settle, failing if any fails. An
    /// unknown type is reported and resolves to `Value::Null`.
    pub fn dispatch(&self, ty: &str, payload: Option<Value>) -> MustBoxFuture<'static, ActionResult> {
        let entries = self.inner.actions.read().get(ty).cloned().unwrap_or_default();
        if entries.is_empty() {
            tracing::error!(ty, "unknown action type");
            return MustBoxFuture::new(std::future::ready(Ok(Value::Null)));
        }
        let subscribers: Vec<_> = self.inner.action_subscribers.read().clone();
        if !subscribers.is_empty() {
            let record = ActionRecord {
                ty: ty.to_string(),
                payload: payload.clone(),
            };
            let state = self.inner.root_cell().snapshot();
            for subscriber in subscribers {
                subscriber(&record, &state);
            }
        }
        let joined: MustBoxFuture<'static, ActionResult> = if entries.len() == 1 {
            entries[0](payload)
        } else {
            let futures: Vec<_> = entries.iter().map(|entry| entry(payload.clone())).collect();
            MustBoxFuture::new(async move {
                let values = futures::future::try_join_all(futures).await?;
                Ok(Value::Array(values))
            })
        };
        let hook = self.inner.on_action_error.clone();
        MustBoxFuture::new(async move {
            match joined.await {
                Ok(value) => Ok(value),
                Err(err) => {
                    if let Some(hook) = &hook {
                        hook(&err);
                    }
                    Err(err)
                }
            }
        })
    }

    /// Object-style dispatch, mirroring [`commit_value`][Self::commit_value].
    pub fn dispatch_value(
        &self,
        payload: Value,
    ) -> StoreResult<MustBoxFuture<'static, ActionResult>> {
        let ty = extract_type(&payload)?;
        Ok(self.dispatch(&ty, Some(payload)))
    }

    /// Notify `f` after every commit, in subscription order.
    pub fn subscribe(
        &self,
        f: impl Fn(&MutationRecord, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        let f: Arc<SubscriberFn> = Arc::new(f);
        self.inner.subscribers.write().push(f.clone());
        Subscription {
            inner: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Mutation(Arc::downgrade(&f)),
        }
    }

    /// Notify `f` before every dispatched action begins executing.
    pub fn subscribe_action(
        &self,
        f: impl Fn(&ActionRecord, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        let f: Arc<ActionSubscriberFn> = Arc::new(f);
        self.inner.action_subscribers.write().push(f.clone());
        Subscription {
            inner: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Action(Arc::downgrade(&f)),
        }
    }

    /// Observe `getter(root_state, root_getters)` for deep changes. The
    /// watch survives reactive-view rebuilds and runs until stopped.
    pub fn watch(
        &self,
        getter: impl Fn(&Value, &GetterScope<'_>) -> Value + Send + Sync + 'static,
        callback: impl Fn(&Value, &Value) + Send + Sync + 'static,
        options: WatchOptions,
    ) -> WatchHandle {
        let watch = Arc::new(UserWatch {
            id: self.inner.next_watch_id.fetch_add(1, Ordering::SeqCst),
            selector: Arc::new(getter),
            callback: Arc::new(callback),
            sync: options.sync,
            cell_watch: Mutex::new(None),
        });
        self.inner.watches.write().push(watch.clone());
        self.install_watch(&watch);
        WatchHandle {
            inner: Arc::downgrade(&self.inner),
            id: watch.id,
        }
    }

    /// Swap the whole state tree, e.g. to restore a snapshot. Bypasses the
    /// per-module installation path entirely.
    pub fn replace_state(&self, state: Value) {
        let root = self.inner.root_cell();
        self.inner.with_commit(|| root.replace(state));
    }

    /// Register a module subtree at runtime. `preserve_state` keeps any live
    /// state already at the path instead of attaching the spec's initial
    /// state.
    pub fn register_module(
        &self,
        path: impl Into<ModulePath>,
        spec: ModuleSpec,
        options: RegisterOptions,
    ) -> StoreResult<()> {
        let path = path.into();
        if path.is_root() {
            return Err(StoreError::RootModuleNotDynamic);
        }
        self.inner.modules.write().register(&path, spec, true)?;
        if let Err(err) = self.install_module(&path, false, options.preserve_state) {
            // Roll the tree back and purge whatever was partially installed,
            // including any state already attached for the failed subtree.
            let _ = self.inner.modules.write().unregister(&path);
            if !options.preserve_state {
                if let Some(key) = path.key() {
                    let parent = path.parent();
                    let root = self.inner.root_cell();
                    self.inner
                        .with_commit(|| root.detach_property(parent.segments(), key));
                }
            }
            self.reset_store(false);
            return Err(err);
        }
        let state = self.inner.root_cell().snapshot();
        self.reset_store_vm(state, false);
        Ok(())
    }

    /// Unregister a runtime-registered module and detach its live state.
    /// Construction-time modules refuse with a warning; the call is a no-op.
    pub fn unregister_module(&self, path: impl Into<ModulePath>) -> StoreResult<()> {
        let path = path.into();
        if path.is_root() {
            return Err(StoreError::RootModuleNotDynamic);
        }
        if !self.inner.modules.write().unregister(&path)? {
            tracing::warn!(path = %path, "refusing to unregister a construction-time module");
            return Ok(());
        }
        if let Some(key) = path.key() {
            let parent = path.parent();
            let root = self.inner.root_cell();
            self.inner
                .with_commit(|| root.detach_property(parent.segments(), key));
        }
        self.reset_store(false);
        Ok(())
    }

    /// Swap handler definitions in place (state and tree structure are
    /// preserved), then rebuild registries and the reactive view.
    pub fn hot_update(&self, new_root_spec: ModuleSpec) {
        self.inner.modules.write().update(new_root_spec);
        self.reset_store(true);
    }

    /// Wire one module (and recursively its children) into the store-wide
    /// registries: attach its state, bind its local context, and register
    /// its mutations, actions and getters under the resolved namespace.
    fn install_module(&self, path: &ModulePath, hot: bool, preserve_state: bool) -> StoreResult<()> {
        let (namespace, snapshot) = {
            let modules = self.inner.modules.read();
            let node = modules
                .get(path)
                .ok_or_else(|| StoreError::UnknownModule(path.clone()))?;
            (modules.get_namespace(path)?, node.install_snapshot())
        };

        if snapshot.namespaced {
            let mut map = self.inner.namespace_map.write();
            if let Some(existing) = map.get(&namespace) {
                if existing != path {
                    return Err(StoreError::NamespaceCollision(namespace));
                }
            }
            map.insert(namespace.clone(), path.clone());
        }

        // Attach this module's initial state onto the parent's state object.
        // Skipped on hot re-installs and preserved registrations, where the
        // live value must survive.
        if !path.is_root() && !hot && !preserve_state {
            if let Some(key) = path.key() {
                let parent = path.parent();
                let child = snapshot.state.clone();
                let root = self.inner.root_cell();
                self.inner
                    .with_commit(|| root.attach_property(parent.segments(), key, child));
            }
        }

        if let Some(node) = self.inner.modules.write().get_mut(path) {
            node.context = Some(ModuleContext {
                namespace: namespace.clone(),
                path: path.clone(),
            });
        }

        for (name, raw) in snapshot.mutations {
            let ty = format!("{namespace}{name}");
            let module_path = path.clone();
            let entry: MutationEntry = Arc::new(move |root_state, payload| {
                match state_at_mut(root_state, module_path.segments()) {
                    Some(local) => raw(local, payload),
                    None => tracing::error!(
                        path = %module_path,
                        "local state missing while applying mutation"
                    ),
                }
            });
            self.inner
                .mutations
                .write()
                .entry(ty)
                .or_default()
                .push(entry);
        }

        for (name, action) in snapshot.actions {
            let ty = if action.root {
                name.clone()
            } else {
                format!("{namespace}{name}")
            };
            let weak = Arc::downgrade(&self.inner);
            let module_path = path.clone();
            let handler = action.handler.clone();
            let entry: ActionEntry = Arc::new(move |payload| {
                let Some(inner) = weak.upgrade() else {
                    return MustBoxFuture::new(std::future::ready(Err(anyhow::Error::new(
                        StoreError::InactiveStore,
                    ))));
                };
                // The local context is rebound on every install pass; read
                // it at invocation so a hot update is picked up immediately.
                let context = inner
                    .modules
                    .read()
                    .get(&module_path)
                    .and_then(|m| m.context.clone());
                let Some(context) = context else {
                    return MustBoxFuture::new(std::future::ready(Err(anyhow::Error::new(
                        StoreError::UnknownModule(module_path.clone()),
                    ))));
                };
                let ctx = ActionContext {
                    store: Store { inner },
                    namespace: context.namespace,
                    path: context.path,
                };
                handler(ctx, payload)
            });
            self.inner.actions.write().entry(ty).or_default().push(entry);
        }

        for (name, raw) in snapshot.getters {
            let ty = format!("{namespace}{name}");
            let mut getters = self.inner.wrapped_getters.write();
            if getters.contains_key(&ty) {
                tracing::error!(key = %ty, "duplicate getter key; keeping the first registration");
                continue;
            }
            let weak = Arc::downgrade(&self.inner);
            let local_namespace = namespace.clone();
            let module_path = path.clone();
            let derived: DerivedFn = Arc::new(move |root_state| {
                let Some(inner) = weak.upgrade() else {
                    return Value::Null;
                };
                let local_scope = GetterScope {
                    inner: inner.as_ref(),
                    namespace: &local_namespace,
                };
                let root_scope = GetterScope {
                    inner: inner.as_ref(),
                    namespace: "",
                };
                let local = state_at(root_state, &module_path)
                    .cloned()
                    .unwrap_or(Value::Null);
                raw(&local, &local_scope, root_state, &root_scope)
            });
            getters.insert(ty, derived);
        }

        for key in snapshot.children {
            self.install_module(&path.join(&key), hot, preserve_state)?;
        }
        Ok(())
    }

    /// Rebuild every registry from the live tree, then rebuild the reactive
    /// view. Stale handler closures from the previous install are discarded
    /// wholesale.
    fn reset_store(&self, hot: bool) {
        self.inner.mutations.write().clear();
        self.inner.actions.write().clear();
        self.inner.wrapped_getters.write().clear();
        self.inner.namespace_map.write().clear();
        if let Err(err) = self.install_module(&ModulePath::root(), true, false) {
            tracing::error!(error = %err, "module tree reinstallation failed");
        }
        let state = self.inner.root_cell().snapshot();
        self.reset_store_vm(state, hot);
    }

    /// Replace the root cell with a fresh one wrapping `state` plus the
    /// current wrapped-getter set; re-attach the strict watcher and user
    /// watches; retire the superseded cell once the update cycle settles.
    fn reset_store_vm(&self, state: Value, hot: bool) {
        let fresh = self.inner.reactivity.make_reactive_root(state);
        for (name, compute) in self.inner.wrapped_getters.read().iter() {
            fresh.define_derived(name, compute.clone());
        }
        let old = std::mem::replace(&mut *self.inner.root.write(), fresh);
        if self.inner.strict {
            self.enable_strict_watcher();
        }
        let watches: Vec<_> = self.inner.watches.read().clone();
        for watch in &watches {
            self.install_watch(watch);
        }
        if hot {
            // Anything still reading the superseded cell must recompute
            // against the rebuilt getters rather than serve cached values.
            old.invalidate();
        }
        self.inner
            .reactivity
            .schedule_on_quiescence(Box::new(move || old.deactivate()));
    }

    fn enable_strict_watcher(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.root_cell().watch_deep(
            Box::new(|state| state.clone()),
            Box::new(move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    if !inner.committing.load(Ordering::SeqCst) {
                        inner.report_strict_violation();
                    }
                }
            }),
            WatchOptions { sync: true },
        );
    }

    fn install_watch(&self, watch: &Arc<UserWatch>) {
        let weak = Arc::downgrade(&self.inner);
        let selector = watch.selector.clone();
        let callback = watch.callback.clone();
        let cell = self.inner.root_cell();
        let cell_id = cell.watch_deep(
            Box::new(move |state| match weak.upgrade() {
                Some(inner) => {
                    let scope = GetterScope {
                        inner: inner.as_ref(),
                        namespace: "",
                    };
                    selector(state, &scope)
                }
                None => Value::Null,
            }),
            Box::new(move |new, old| callback(new, old)),
            WatchOptions { sync: watch.sync },
        );
        *watch.cell_watch.lock() = Some(cell_id);
    }
}

fn extract_type(payload: &Value) -> StoreResult<String> {
    payload
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(StoreError::BadTypeField)
}
