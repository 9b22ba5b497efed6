use serde_json::json;
use trellis::{ModuleSpec, RegisterOptions, Store};

fn products() -> ModuleSpec {
    ModuleSpec::new()
        .namespaced(true)
        .state(json!({
            "all": [
                { "id": 1, "title": "field notes", "price": 5,  "inventory": 2 },
                { "id": 2, "title": "fountain pen", "price": 30, "inventory": 0 },
                { "id": 3, "title": "ink bottle",  "price": 12, "inventory": 5 },
            ]
        }))
        .getter("available", |state, _, _, _| {
            let all = state["all"].as_array().unwrap();
            json!(all
                .iter()
                .filter(|p| p["inventory"].as_i64().unwrap() > 0)
                .collect::<Vec<_>>())
        })
        .mutation("decrement_inventory", |state, payload| {
            let id = payload.unwrap().as_i64().unwrap();
            for product in state["all"].as_array_mut().unwrap() {
                if product["id"].as_i64() == Some(id) {
                    let left = product["inventory"].as_i64().unwrap();
                    product["inventory"] = json!(left - 1);
                }
            }
        })
}

fn cart() -> ModuleSpec {
    ModuleSpec::new()
        .namespaced(true)
        .state(json!({ "items": [], "checkout_status": null }))
        .getter("total", |state, _, root, _| {
            let all = root["products"]["all"].as_array().unwrap();
            let total: i64 = state["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|item| {
                    let id = item["id"].as_i64().unwrap();
                    let qty = item["quantity"].as_i64().unwrap();
                    let price = all
                        .iter()
                        .find(|p| p["id"].as_i64() == Some(id))
                        .map(|p| p["price"].as_i64().unwrap())
                        .unwrap_or(0);
                    price * qty
                })
                .sum();
            json!(total)
        })
        .mutation("push_item", |state, payload| {
            let id = payload.unwrap().clone();
            state["items"]
                .as_array_mut()
                .unwrap()
                .push(json!({ "id": id, "quantity": 1 }));
        })
        .mutation("set_status", |state, payload| {
            state["checkout_status"] = payload.unwrap().clone();
        })
        .action("add_product", |ctx, payload| async move {
            let id = payload.unwrap();
            let in_stock = ctx
                .root_state()["products"]["all"]
                .as_array()
                .unwrap()
                .iter()
                .any(|p| p["id"] == id && p["inventory"].as_i64().unwrap() > 0);
            if !in_stock {
                anyhow::bail!("product {id} is out of stock");
            }
            ctx.commit("push_item", Some(id.clone()));
            ctx.commit_root("products/decrement_inventory", Some(id));
            Ok(json!(null))
        })
        .action("checkout", |ctx, _| async move {
            ctx.commit("set_status", Some(json!("successful")));
            ctx.getter("total").ok_or_else(|| anyhow::anyhow!("no total"))
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = Store::new(ModuleSpec::new().state(json!({})).module("products", products()))?;

    // The cart arrives later, e.g. from a lazily loaded feature.
    store.register_module("cart", cart(), RegisterOptions::default())?;

    store.dispatch("cart/add_product", Some(json!(1))).await?;
    store.dispatch("cart/add_product", Some(json!(3))).await?;

    // Sold out: the dispatch fails and the cart is untouched.
    let rejected = store.dispatch("cart/add_product", Some(json!(2))).await;
    assert!(rejected.is_err());

    let total = store.dispatch("cart/checkout", None).await?;
    assert_eq!(total, json!(17));
    assert_eq!(
        store.state()["cart"]["checkout_status"],
        json!("successful")
    );
    assert_eq!(store.getter("products/available").unwrap().as_array().unwrap().len(), 2);

    println!("checkout complete, total = {total}");
    Ok(())
}
