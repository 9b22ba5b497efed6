//! The module tree: one [`Module`] node per user-declared module.

mod collection;

pub(crate) use collection::ModuleCollection;

use indexmap::IndexMap;
use serde_json::Value;

use crate::path::ModulePath;
use crate::spec::{ActionSpec, GetterFn, ModuleSpec, MutationFn};

/// The per-install binding of a module to its place in the store: the
/// namespace prefix its keys register under, and its path in the state tree.
/// Rebuilt on every install pass; prior bindings are discarded wholesale
/// along with the registries that captured them.
#[derive(Debug, Clone)]
pub(crate) struct ModuleContext {
    pub namespace: String,
    pub path: ModulePath,
}

/// One node of the module tree.
///
/// Wraps a [`ModuleSpec`]'s handler tables, the state value resolved at
/// construction, and the registry of child nodes. Nodes registered at
/// store-construction time are permanent; nodes registered afterward carry
/// `runtime = true` and may be unregistered again.
pub struct Module {
    runtime: bool,
    namespaced: bool,
    pub(crate) state: Value,
    mutations: IndexMap<String, MutationFn>,
    actions: IndexMap<String, ActionSpec>,
    getters: IndexMap<String, GetterFn>,
    children: IndexMap<String, Module>,
    pub(crate) context: Option<ModuleContext>,
}

/// Everything the installer needs from a node, cloned out so no tree lock is
/// held while registries are rebuilt. Handler tables are `Arc`s, so this is
/// shallow.
pub(crate) struct InstallSnapshot {
    pub namespaced: bool,
    pub state: Value,
    pub mutations: IndexMap<String, MutationFn>,
    pub actions: IndexMap<String, ActionSpec>,
    pub getters: IndexMap<String, GetterFn>,
    pub children: Vec<String>,
}

impl Module {
    /// Construct from a spec whose `modules` table has already been drained
    /// by the caller (children are registered as separate nodes).
    pub(crate) fn new(spec: ModuleSpec, runtime: bool) -> Self {
        debug_assert!(spec.modules.is_empty());
        let state = spec
            .state
            .as_ref()
            .map(|init| init.resolve())
            .unwrap_or_else(|| Value::Object(Default::default()));
        Self {
            runtime,
            namespaced: spec.namespaced,
            state,
            mutations: spec.mutations,
            actions: spec.actions,
            getters: spec.getters,
            children: IndexMap::new(),
            context: None,
        }
    }

    pub fn namespaced(&self) -> bool {
        self.namespaced
    }

    pub fn runtime(&self) -> bool {
        self.runtime
    }

    pub(crate) fn add_child(&mut self, key: &str, module: Module) {
        self.children.insert(key.to_string(), module);
    }

    pub(crate) fn remove_child(&mut self, key: &str) {
        self.children.shift_remove(key);
    }

    pub fn get_child(&self, key: &str) -> Option<&Module> {
        self.children.get(key)
    }

    pub(crate) fn get_child_mut(&mut self, key: &str) -> Option<&mut Module> {
        self.children.get_mut(key)
    }

    /// Swap in a new definition in place: the namespaced flag always, each
    /// handler table only when the new spec declares one. State and children
    /// are never touched here.
    pub(crate) fn update(&mut self, spec: ModuleSpec) {
        self.namespaced = spec.namespaced;
        if !spec.mutations.is_empty() {
            self.mutations = spec.mutations;
        }
        if !spec.actions.is_empty() {
            self.actions = spec.actions;
        }
        if !spec.getters.is_empty() {
            self.getters = spec.getters;
        }
    }

    pub fn for_each_child(&self, mut f: impl FnMut(&str, &Module)) {
        for (key, child) in &self.children {
            f(key, child);
        }
    }

    pub fn for_each_mutation(&self, mut f: impl FnMut(&str, &MutationFn)) {
        for (name, handler) in &self.mutations {
            f(name, handler);
        }
    }

    pub fn for_each_action(&self, mut f: impl FnMut(&str, &ActionSpec)) {
        for (name, spec) in &self.actions {
            f(name, spec);
        }
    }

    pub fn for_each_getter(&self, mut f: impl FnMut(&str, &GetterFn)) {
        for (name, handler) in &self.getters {
            f(name, handler);
        }
    }

    pub(crate) fn install_snapshot(&self) -> InstallSnapshot {
        InstallSnapshot {
            namespaced: self.namespaced,
            state: self.state.clone(),
            mutations: self.mutations.clone(),
            actions: self.actions.clone(),
            getters: self.getters.clone(),
            children: self.children.keys().cloned().collect(),
        }
    }
}
