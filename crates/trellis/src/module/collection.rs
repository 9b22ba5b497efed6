//! Ownership and addressing of the module tree.

use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::module::Module;
use crate::path::ModulePath;
use crate::spec::ModuleSpec;

/// The single-rooted tree of [`Module`] nodes, addressed by [`ModulePath`].
pub(crate) struct ModuleCollection {
    root: Module,
}

impl ModuleCollection {
    /// Register the root spec and everything declared inline under it.
    /// Construction-time modules are permanent (`runtime = false`).
    pub fn new(root_spec: ModuleSpec) -> StoreResult<Self> {
        let mut this = Self {
            // Placeholder, replaced by the empty-path registration below.
            root: Module::new(ModuleSpec::new(), false),
        };
        this.register(&ModulePath::root(), root_spec, false)?;
        Ok(this)
    }

    /// The root module's initial state, the seed of the whole state tree.
    pub fn root_state(&self) -> Value {
        self.root.state.clone()
    }

    pub fn get(&self, path: &ModulePath) -> Option<&Module> {
        let mut node = &self.root;
        for key in path.segments() {
            node = node.get_child(key)?;
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &ModulePath) -> Option<&mut Module> {
        let mut node = &mut self.root;
        for key in path.segments() {
            node = node.get_child_mut(key)?;
        }
        Some(node)
    }

    /// The cumulative namespace prefix for `path`: `key + "/"` appended at
    /// every namespaced node along the walk, non-namespaced nodes skipped.
    pub fn get_namespace(&self, path: &ModulePath) -> StoreResult<String> {
        let mut node = &self.root;
        let mut namespace = String::new();
        for key in path.segments() {
            node = node
                .get_child(key)
                .ok_or_else(|| StoreError::UnknownModule(path.clone()))?;
            if node.namespaced() {
                namespace.push_str(key);
                namespace.push('/');
            }
        }
        Ok(namespace)
    }

    /// Register `spec` at `path`, then recurse into its declared children
    /// with the same `runtime` flag. The parent path must already resolve.
    pub fn register(
        &mut self,
        path: &ModulePath,
        mut spec: ModuleSpec,
        runtime: bool,
    ) -> StoreResult<()> {
        if let Some(key) = path.key() {
            if key.contains('/') {
                return Err(StoreError::InvalidModuleKey(key.to_string()));
            }
        }
        let children = std::mem::take(&mut spec.modules);
        let node = Module::new(spec, runtime);
        if path.is_root() {
            self.root = node;
        } else {
            let parent = self
                .get_mut(&path.parent())
                .ok_or_else(|| StoreError::MissingParent(path.clone()))?;
            parent.add_child(path.key().unwrap(), node);
        }
        for (key, child) in children {
            self.register(&path.join(&key), child, runtime)?;
        }
        Ok(())
    }

    /// Detach the node at `path`. Construction-time modules refuse removal:
    /// returns `Ok(false)` and the tree is left untouched.
    pub fn unregister(&mut self, path: &ModulePath) -> StoreResult<bool> {
        let key = path
            .key()
            .ok_or(StoreError::RootModuleNotDynamic)?
            .to_string();
        let parent = self
            .get_mut(&path.parent())
            .ok_or_else(|| StoreError::MissingParent(path.clone()))?;
        let child = parent
            .get_child(&key)
            .ok_or_else(|| StoreError::UnknownModule(path.clone()))?;
        if !child.runtime() {
            return Ok(false);
        }
        parent.remove_child(&key);
        Ok(true)
    }

    /// Hot-update: re-apply specs onto matching live nodes, in place.
    /// Structural additions are unsupported; the affected subtree's update is
    /// abandoned with a warning.
    pub fn update(&mut self, new_root_spec: ModuleSpec) {
        update_node(&ModulePath::root(), &mut self.root, new_root_spec);
    }
}

fn update_node(path: &ModulePath, target: &mut Module, mut spec: ModuleSpec) {
    let children = std::mem::take(&mut spec.modules);
    target.update(spec);
    for (key, child_spec) in children {
        let child_path = path.join(&key);
        match target.get_child_mut(&key) {
            Some(child) => update_node(&child_path, child, child_spec),
            None => {
                tracing::warn!(
                    path = %child_path,
                    "hot update declares a module not present in the live tree; \
                     structural changes need a full rebuild"
                );
                return;
            }
        }
    }
}
