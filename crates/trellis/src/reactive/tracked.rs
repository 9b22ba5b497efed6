//! A self-contained [`Reactivity`] implementation.
//!
//! `TrackedRoot` invalidates its derived-value cache with a version counter
//! bumped on every write, and detects deep changes by re-running watch
//! selectors and comparing values. Sync watchers fire at write time;
//! everything else (non-sync watchers, scheduled disposals) queues until the
//! host drains it with [`TrackedReactivity::settle`]. Hosts that embed the
//! store in a UI framework use that framework's reactivity instead.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{ChangeFn, DerivedFn, Reactivity, ReactiveRoot, SelectorFn, WatchId, WatchOptions};
use crate::path::state_at_mut;

type Job = Box<dyn FnOnce() + Send>;

/// Shared quiescence queue plus a handle to the most recent root cell.
#[derive(Default)]
pub struct TrackedReactivity {
    jobs: Arc<Mutex<VecDeque<Job>>>,
    current: Mutex<Weak<TrackedRoot>>,
}

impl TrackedReactivity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run everything deferred to quiescence: non-sync watcher
    /// notifications and scheduled disposals. Jobs may enqueue further jobs;
    /// the queue is drained until empty.
    pub fn settle(&self) {
        loop {
            let job = self.jobs.lock().pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// The most recently created root cell. This is what a host binds its
    /// views to, and the only path by which state can be written without
    /// going through the store.
    pub fn current_root(&self) -> Option<Arc<TrackedRoot>> {
        self.current.lock().upgrade()
    }
}

impl Reactivity for TrackedReactivity {
    fn make_reactive_root(&self, initial: Value) -> Arc<dyn ReactiveRoot> {
        let jobs = self.jobs.clone();
        let root = Arc::new_cyclic(|weak: &Weak<TrackedRoot>| TrackedRoot {
            state: RwLock::new(initial),
            version: AtomicU64::new(0),
            derived: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            watchers: RwLock::new(Vec::new()),
            next_watch_id: AtomicU64::new(0),
            active: AtomicBool::new(true),
            jobs,
            weak_self: weak.clone(),
        });
        *self.current.lock() = Arc::downgrade(&root);
        root
    }

    fn schedule_on_quiescence(&self, f: Box<dyn FnOnce() + Send>) {
        self.jobs.lock().push_back(f);
    }
}

struct Watcher {
    id: WatchId,
    selector: SelectorFn,
    on_change: ChangeFn,
    sync: bool,
    last: Mutex<Value>,
    /// A notification job is already queued for this watcher.
    pending: AtomicBool,
}

/// A version-counted reactive cell over one state tree.
pub struct TrackedRoot {
    state: RwLock<Value>,
    version: AtomicU64,
    derived: RwLock<HashMap<String, DerivedFn>>,
    cache: Mutex<HashMap<String, (u64, Value)>>,
    watchers: RwLock<Vec<Arc<Watcher>>>,
    next_watch_id: AtomicU64,
    active: AtomicBool,
    jobs: Arc<Mutex<VecDeque<Job>>>,
    weak_self: Weak<TrackedRoot>,
}

impl TrackedRoot {
    fn after_write(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let watchers: Vec<_> = self.watchers.read().clone();
        if watchers.is_empty() {
            return;
        }
        let snapshot = self.state.read().clone();
        for w in watchers {
            if w.sync {
                Self::run_watcher(&w, &snapshot);
            } else if !w.pending.swap(true, Ordering::SeqCst) {
                let weak = self.weak_self.clone();
                self.jobs.lock().push_back(Box::new(move || {
                    w.pending.store(false, Ordering::SeqCst);
                    if let Some(root) = weak.upgrade() {
                        let snap = root.state.read().clone();
                        Self::run_watcher(&w, &snap);
                    }
                }));
            }
        }
    }

    fn run_watcher(w: &Watcher, snapshot: &Value) {
        let next = (w.selector)(snapshot);
        let mut last = w.last.lock();
        if *last != next {
            let old = std::mem::replace(&mut *last, next.clone());
            drop(last);
            (w.on_change)(&next, &old);
        }
    }
}

impl ReactiveRoot for TrackedRoot {
    fn snapshot(&self) -> Value {
        self.state.read().clone()
    }

    fn replace(&self, next: Value) {
        *self.state.write() = next;
        self.after_write();
    }

    fn mutate(&self, f: &mut dyn FnMut(&mut Value)) {
        {
            let mut state = self.state.write();
            f(&mut state);
        }
        self.after_write();
    }

    fn attach_property(&self, parent_path: &[String], key: &str, child: Value) {
        {
            let mut state = self.state.write();
            match state_at_mut(&mut state, parent_path).and_then(Value::as_object_mut) {
                Some(parent) => {
                    parent.insert(key.to_string(), child);
                }
                None => {
                    tracing::error!(
                        path = parent_path.join("."),
                        key,
                        "cannot attach: parent state is not an object"
                    );
                    return;
                }
            }
        }
        self.after_write();
    }

    fn detach_property(&self, parent_path: &[String], key: &str) {
        {
            let mut state = self.state.write();
            match state_at_mut(&mut state, parent_path).and_then(Value::as_object_mut) {
                Some(parent) => {
                    parent.remove(key);
                }
                None => return,
            }
        }
        self.after_write();
    }

    fn define_derived(&self, name: &str, compute: DerivedFn) {
        self.derived.write().insert(name.to_string(), compute);
        self.cache.lock().remove(name);
    }

    fn derived(&self, name: &str) -> Option<Value> {
        let compute = self.derived.read().get(name)?.clone();
        let version = self.version.load(Ordering::SeqCst);
        if let Some((cached_version, value)) = self.cache.lock().get(name) {
            if *cached_version == version {
                return Some(value.clone());
            }
        }
        // Compute outside the cache lock: derived values may read each other.
        let snapshot = self.state.read().clone();
        let value = compute(&snapshot);
        self.cache
            .lock()
            .insert(name.to_string(), (version, value.clone()));
        Some(value)
    }

    fn watch_deep(
        &self,
        selector: SelectorFn,
        on_change: ChangeFn,
        opts: WatchOptions,
    ) -> WatchId {
        let id = self.next_watch_id.fetch_add(1, Ordering::SeqCst);
        // Seed from a clone: the selector may re-enter this cell's locks.
        let snapshot = self.state.read().clone();
        let last = selector(&snapshot);
        self.watchers.write().push(Arc::new(Watcher {
            id,
            selector,
            on_change,
            sync: opts.sync,
            last: Mutex::new(last),
            pending: AtomicBool::new(false),
        }));
        id
    }

    fn unwatch(&self, id: WatchId) {
        self.watchers.write().retain(|w| w.id != id);
    }

    fn invalidate(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.cache.lock().clear();
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.derived.write().clear();
        self.watchers.write().clear();
        self.cache.lock().clear();
    }
}
