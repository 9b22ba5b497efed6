//! Commit routing, getters, subscribers, watches, and module lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use trellis::{
    ModuleSpec, ReactiveRoot, RegisterOptions, Store, StoreError, TrackedReactivity, WatchOptions,
};

fn counter_spec() -> ModuleSpec {
    ModuleSpec::new()
        .state(json!({ "count": 0 }))
        .mutation("increment", |state, payload| {
            let by = payload.and_then(|p| p.as_i64()).unwrap_or(1);
            let n = state["count"].as_i64().unwrap();
            state["count"] = json!(n + by);
        })
}

#[test]
fn commit_runs_every_handler_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let a = order.clone();
    let b = order.clone();
    // A root handler and a non-namespaced child handler share the type key.
    let spec = ModuleSpec::new()
        .state(json!({ "hits": 0 }))
        .mutation("bump", move |state, _| {
            a.lock().push("root");
            state["hits"] = json!(state["hits"].as_i64().unwrap() + 1);
        })
        .module(
            "child",
            ModuleSpec::new()
                .state(json!({ "hits": 0 }))
                .mutation("bump", move |state, _| {
                    b.lock().push("child");
                    state["hits"] = json!(state["hits"].as_i64().unwrap() + 1);
                }),
        );
    let store = Store::new(spec).unwrap();

    store.commit("bump", None);
    assert_eq!(order.lock().as_slice(), ["root", "child"]);
    let state = store.state();
    assert_eq!(state["hits"], json!(1));
    assert_eq!(state["child"]["hits"], json!(1));
}

#[test]
fn commit_receives_the_payload() {
    let store = Store::new(counter_spec()).unwrap();
    store.commit("increment", Some(json!(5)));
    store.commit("increment", None);
    assert_eq!(store.state()["count"], json!(6));
}

#[test]
fn unknown_mutation_type_is_a_no_op() {
    let store = Store::new(counter_spec()).unwrap();
    store.commit("no_such_type", None);
    assert_eq!(store.state()["count"], json!(0));
}

#[test]
fn commit_value_takes_the_type_from_the_payload() {
    let store = Store::new(
        ModuleSpec::new()
            .state(json!({ "items": [] }))
            .mutation("push", |state, payload| {
                let item = payload.unwrap()["item"].clone();
                state["items"].as_array_mut().unwrap().push(item);
            }),
    )
    .unwrap();

    store.commit_value(json!({ "type": "push", "item": "apple" })).unwrap();
    assert_eq!(store.state()["items"], json!(["apple"]));

    assert!(matches!(
        store.commit_value(json!({ "item": "pear" })),
        Err(StoreError::BadTypeField)
    ));
    assert!(matches!(
        store.commit_value(json!({ "type": 3 })),
        Err(StoreError::BadTypeField)
    ));
}

#[test]
fn namespaced_module_keys_require_the_prefix() {
    let spec = ModuleSpec::new().module(
        "cart",
        ModuleSpec::new()
            .namespaced(true)
            .state(json!({ "items": 0 }))
            .mutation("add", |state, _| {
                state["items"] = json!(state["items"].as_i64().unwrap() + 1);
            }),
    );
    let store = Store::new(spec).unwrap();

    // The bare key does not reach the namespaced handler.
    store.commit("add", None);
    assert_eq!(store.state()["cart"]["items"], json!(0));

    store.commit("cart/add", None);
    assert_eq!(store.state()["cart"]["items"], json!(1));
    assert!(store.has_namespace("cart/"));
    assert!(!store.has_namespace("checkout/"));
}

#[test]
fn getters_cache_between_commits() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let store = Store::new(counter_spec().getter("doubled", move |state, _, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        json!(state["count"].as_i64().unwrap() * 2)
    }))
    .unwrap();

    assert_eq!(store.getter("doubled"), Some(json!(0)));
    assert_eq!(store.getter("doubled"), Some(json!(0)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    store.commit("increment", None);
    assert_eq!(store.getter("doubled"), Some(json!(2)));
    assert_eq!(store.getter("doubled"), Some(json!(2)));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    assert_eq!(store.getter("missing"), None);
}

#[test]
fn getters_compose_through_their_scopes() {
    let spec = ModuleSpec::new()
        .state(json!({ "tax": 2 }))
        .getter("tax", |state, _, _, _| state["tax"].clone())
        .module(
            "cart",
            ModuleSpec::new()
                .namespaced(true)
                .state(json!({ "subtotal": 10 }))
                .getter("subtotal", |state, _, _, _| state["subtotal"].clone())
                .getter("total", |_, local, _, root| {
                    let subtotal = local.get("subtotal").unwrap().as_i64().unwrap();
                    let tax = root.get("tax").unwrap().as_i64().unwrap();
                    json!(subtotal + tax)
                }),
        );
    let store = Store::new(spec).unwrap();
    assert_eq!(store.getter("cart/total"), Some(json!(12)));
}

#[test]
fn duplicate_getter_key_keeps_the_first_registration() {
    // Both non-namespaced modules declare "g"; the second is dropped.
    let spec = ModuleSpec::new()
        .module(
            "a",
            ModuleSpec::new().getter("g", |_, _, _, _| json!("from a")),
        )
        .module(
            "b",
            ModuleSpec::new().getter("g", |_, _, _, _| json!("from b")),
        );
    let store = Store::new(spec).unwrap();
    assert_eq!(store.getter("g"), Some(json!("from a")));
}

#[test]
fn subscribers_run_in_subscription_order_after_the_commit() {
    let store = Store::new(counter_spec()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = seen.clone();
    store.subscribe(move |record, state| {
        first.lock().push((1, record.ty.clone(), state["count"].clone()));
    });
    let second = seen.clone();
    store.subscribe(move |record, state| {
        second.lock().push((2, record.ty.clone(), state["count"].clone()));
    });

    store.commit("increment", None);
    // Both observe the post-commit state, in order.
    assert_eq!(
        seen.lock().as_slice(),
        [
            (1, "increment".to_string(), json!(1)),
            (2, "increment".to_string(), json!(1)),
        ]
    );
}

#[test]
fn unsubscribe_is_idempotent() {
    let store = Store::new(counter_spec()).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let sink = fired.clone();
    let sub = store.subscribe(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    store.commit("increment", None);
    sub.unsubscribe();
    sub.unsubscribe();
    store.commit("increment", None);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn register_module_attaches_state_and_handlers() {
    let store = Store::new(ModuleSpec::new().state(json!({}))).unwrap();
    store
        .register_module(
            "cart",
            ModuleSpec::new()
                .namespaced(true)
                .state(json!({ "items": 0 }))
                .mutation("add", |state, _| {
                    state["items"] = json!(state["items"].as_i64().unwrap() + 1);
                })
                .getter("count", |state, _, _, _| state["items"].clone()),
            RegisterOptions::default(),
        )
        .unwrap();

    assert_eq!(store.state()["cart"]["items"], json!(0));
    store.commit("cart/add", None);
    assert_eq!(store.getter("cart/count"), Some(json!(1)));
}

#[test]
fn register_module_requires_an_existing_parent_and_a_clean_key() {
    let store = Store::new(ModuleSpec::new().state(json!({}))).unwrap();
    assert!(matches!(
        store.register_module(
            vec!["no", "such"],
            ModuleSpec::new(),
            RegisterOptions::default()
        ),
        Err(StoreError::MissingParent(_))
    ));
    assert!(matches!(
        store.register_module("a/b", ModuleSpec::new(), RegisterOptions::default()),
        Err(StoreError::InvalidModuleKey(_))
    ));
    assert!(matches!(
        store.register_module(
            trellis::ModulePath::root(),
            ModuleSpec::new(),
            RegisterOptions::default()
        ),
        Err(StoreError::RootModuleNotDynamic)
    ));
}

#[test]
fn register_module_can_preserve_live_state() {
    // The slot already holds state, e.g. restored from a snapshot.
    let store = Store::new(ModuleSpec::new().state(json!({}))).unwrap();
    store.replace_state(json!({ "cart": { "items": 7 } }));

    store
        .register_module(
            "cart",
            ModuleSpec::new()
                .namespaced(true)
                .state(json!({ "items": 0 }))
                .getter("count", |state, _, _, _| state["items"].clone()),
            RegisterOptions {
                preserve_state: true,
            },
        )
        .unwrap();

    // The live value survives; the spec's initial state is discarded.
    assert_eq!(store.state()["cart"]["items"], json!(7));
    assert_eq!(store.getter("cart/count"), Some(json!(7)));
}

#[test]
fn namespace_collision_is_rejected_and_rolled_back() {
    // Root declares namespaced "a"; registering x.a (x non-namespaced, a
    // namespaced) would resolve to the same "a/" prefix.
    let spec = ModuleSpec::new()
        .module("a", ModuleSpec::new().namespaced(true).state(json!({})))
        .module("x", ModuleSpec::new().state(json!({})));
    let store = Store::new(spec).unwrap();

    let err = store
        .register_module(
            vec!["x", "a"],
            ModuleSpec::new().namespaced(true).state(json!({})),
            RegisterOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NamespaceCollision(ns) if ns == "a/"));

    // The rejected subtree is gone and the store still works.
    assert_eq!(store.state()["x"], json!({}));
    assert!(store.has_namespace("a/"));
}

#[test]
fn failed_registration_detaches_partially_attached_state() {
    let spec = ModuleSpec::new()
        .state(json!({}))
        .module("a", ModuleSpec::new().namespaced(true).state(json!({})));
    let store = Store::new(spec).unwrap();

    // "m" itself installs fine and attaches its state; its namespaced child
    // "a" then collides with the construction-time "a/" prefix.
    let err = store
        .register_module(
            "m",
            ModuleSpec::new()
                .state(json!({ "marker": 1 }))
                .module("a", ModuleSpec::new().namespaced(true).state(json!({}))),
            RegisterOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::NamespaceCollision(ns) if ns == "a/"));

    // The rollback removes the attached state along with the modules: no
    // ghost "m" value survives in the live tree.
    assert_eq!(store.state(), json!({ "a": {} }));
    assert!(!store.has_namespace("m/"));
}

#[test]
fn unregister_refuses_construction_time_modules() {
    let spec = ModuleSpec::new().module("fixed", counter_spec());
    let store = Store::new(spec).unwrap();

    // A warning and a no-op, not an error.
    store.unregister_module("fixed").unwrap();
    assert_eq!(store.state()["fixed"]["count"], json!(0));
    store.commit("increment", None);
    assert_eq!(store.state()["fixed"]["count"], json!(1));
}

#[test]
fn unregister_detaches_state_and_purges_handlers() {
    let store = Store::new(ModuleSpec::new().state(json!({}))).unwrap();
    store
        .register_module(
            "cart",
            ModuleSpec::new()
                .namespaced(true)
                .state(json!({ "items": 0 }))
                .mutation("add", |state, _| {
                    state["items"] = json!(state["items"].as_i64().unwrap() + 1);
                })
                .getter("count", |state, _, _, _| state["items"].clone()),
            RegisterOptions::default(),
        )
        .unwrap();
    store.commit("cart/add", None);

    store.unregister_module("cart").unwrap();
    assert_eq!(store.state(), json!({}));
    assert_eq!(store.getter("cart/count"), None);
    assert!(!store.has_namespace("cart/"));
    // The old type key no longer routes anywhere.
    store.commit("cart/add", None);
    assert_eq!(store.state(), json!({}));

    assert!(matches!(
        store.unregister_module("cart"),
        Err(StoreError::UnknownModule(_))
    ));
}

#[test]
fn hot_update_swaps_handlers_but_keeps_state() {
    let store = Store::new(counter_spec()).unwrap();
    store.commit("increment", None);

    store.hot_update(
        ModuleSpec::new().mutation("increment", |state, _| {
            state["count"] = json!(state["count"].as_i64().unwrap() + 10);
        }),
    );

    // Count survives the update; the new handler body applies.
    assert_eq!(store.state()["count"], json!(1));
    store.commit("increment", None);
    assert_eq!(store.state()["count"], json!(11));
}

#[test]
fn hot_update_refreshes_getters() {
    let store = Store::new(
        counter_spec().getter("label", |state, _, _, _| {
            json!(format!("count={}", state["count"]))
        }),
    )
    .unwrap();
    assert_eq!(store.getter("label"), Some(json!("count=0")));

    store.hot_update(
        ModuleSpec::new().getter("label", |state, _, _, _| {
            json!(format!("n={}", state["count"]))
        }),
    );
    assert_eq!(store.getter("label"), Some(json!("n=0")));
}

#[test]
fn replace_state_swaps_the_tree_wholesale() {
    let store = Store::new(counter_spec()).unwrap();
    store.replace_state(json!({ "count": 42 }));
    assert_eq!(store.state()["count"], json!(42));
    store.commit("increment", None);
    assert_eq!(store.state()["count"], json!(43));
}

#[test]
fn strict_mode_flags_writes_outside_commits() {
    let rx = TrackedReactivity::new();
    let violations = Arc::new(AtomicUsize::new(0));
    let sink = violations.clone();
    let store = Store::builder(counter_spec())
        .strict(true)
        .reactivity(rx.clone())
        .on_strict_violation(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    store.commit("increment", None);
    assert_eq!(violations.load(Ordering::SeqCst), 0);

    // Write through the reactive cell directly, bypassing the store.
    let cell = rx.current_root().unwrap();
    cell.mutate(&mut |state| state["count"] = json!(99));
    assert_eq!(violations.load(Ordering::SeqCst), 1);
    assert_eq!(store.state()["count"], json!(99));
}

#[test]
fn non_strict_mode_lets_rogue_writes_pass() {
    let rx = TrackedReactivity::new();
    let violations = Arc::new(AtomicUsize::new(0));
    let sink = violations.clone();
    let store = Store::builder(counter_spec())
        .reactivity(rx.clone())
        .on_strict_violation(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let cell = rx.current_root().unwrap();
    cell.mutate(&mut |state| state["count"] = json!(5));
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(store.state()["count"], json!(5));
}

#[test]
fn watch_delivers_on_settle_and_coalesces() {
    let rx = TrackedReactivity::new();
    let store = Store::builder(counter_spec())
        .reactivity(rx.clone())
        .build()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.watch(
        |state, _| state["count"].clone(),
        move |new, old| sink.lock().push((new.clone(), old.clone())),
        WatchOptions::default(),
    );

    store.commit("increment", None);
    store.commit("increment", None);
    assert!(seen.lock().is_empty());
    rx.settle();
    assert_eq!(seen.lock().as_slice(), [(json!(2), json!(0))]);
}

#[test]
fn sync_watch_fires_at_commit_time() {
    let store = Store::new(counter_spec()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.watch(
        |state, _| state["count"].clone(),
        move |new, old| sink.lock().push((new.clone(), old.clone())),
        WatchOptions { sync: true },
    );

    store.commit("increment", None);
    assert_eq!(seen.lock().as_slice(), [(json!(1), json!(0))]);
}

#[test]
fn watch_selector_can_use_getters() {
    let store = Store::new(
        counter_spec().getter("doubled", |state, _, _, _| {
            json!(state["count"].as_i64().unwrap() * 2)
        }),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.watch(
        |_, getters| getters.get("doubled").unwrap(),
        move |new, _| sink.lock().push(new.clone()),
        WatchOptions { sync: true },
    );

    store.commit("increment", None);
    assert_eq!(seen.lock().as_slice(), [json!(2)]);
}

#[test]
fn watch_survives_module_registration() {
    let rx = TrackedReactivity::new();
    let store = Store::builder(counter_spec())
        .reactivity(rx.clone())
        .build()
        .unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let sink = fired.clone();
    store.watch(
        |state, _| state["count"].clone(),
        move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        WatchOptions { sync: true },
    );

    // Rebuilds the reactive view; the watch is re-attached to the new cell.
    store
        .register_module(
            "extra",
            ModuleSpec::new().state(json!({})),
            RegisterOptions::default(),
        )
        .unwrap();
    rx.settle();

    store.commit("increment", None);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn stopped_watch_no_longer_fires() {
    let store = Store::new(counter_spec()).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let sink = fired.clone();
    let handle = store.watch(
        |state, _| state["count"].clone(),
        move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        },
        WatchOptions { sync: true },
    );

    store.commit("increment", None);
    handle.stop();
    handle.stop();
    store.commit("increment", None);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn deeply_nested_namespaces_concatenate() {
    let spec = ModuleSpec::new().module(
        "account",
        ModuleSpec::new()
            .namespaced(true)
            .state(json!({}))
            .module(
                "profile",
                ModuleSpec::new().state(json!({})).module(
                    "settings",
                    ModuleSpec::new()
                        .namespaced(true)
                        .state(json!({ "theme": "light" }))
                        .mutation("set_theme", |state, payload| {
                            state["theme"] = payload.unwrap().clone();
                        }),
                ),
            ),
    );
    let store = Store::new(spec).unwrap();

    // "profile" is not namespaced: its key is skipped in the prefix.
    store.commit("account/settings/set_theme", Some(json!("dark")));
    assert_eq!(
        store.state()["account"]["profile"]["settings"]["theme"],
        json!("dark")
    );
}

#[test]
fn state_factory_gives_each_registration_a_fresh_value() {
    let store = Store::new(ModuleSpec::new().state(json!({}))).unwrap();
    let module = || {
        ModuleSpec::new()
            .namespaced(true)
            .state_with(|| json!({ "items": [] }))
            .mutation("push", |state, payload| {
                state["items"]
                    .as_array_mut()
                    .unwrap()
                    .push(payload.unwrap().clone());
            })
    };
    store
        .register_module("left", module(), RegisterOptions::default())
        .unwrap();
    store
        .register_module("right", module(), RegisterOptions::default())
        .unwrap();

    store.commit("left/push", Some(json!(1)));
    let state = store.state();
    assert_eq!(state["left"]["items"], json!([1]));
    assert_eq!(state["right"]["items"], json!([]));
}
