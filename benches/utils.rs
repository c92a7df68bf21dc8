use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const WORDS: &[&str] = &[
    "amber", "basalt", "cobalt", "dune", "ember", "fjord", "garnet", "harbor", "indigo", "juniper",
];

/// Builds `n` order documents from a fixed seed.
///
/// Notes carry markup so every engine pays for escaping, and some orders
/// have no lines so the `else` branches run too.
pub fn generate_orders(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|id| {
            let line_count = rng.random_range(0..12);
            let lines: Vec<Value> = (0..line_count)
                .map(|_| {
                    json!({
                        "sku": format!("{}-{}", pick(&mut rng), rng.random_range(100..999)),
                        "qty": rng.random_range(1..20),
                        "price": rng.random_range(1.0..500.0),
                    })
                })
                .collect();
            let tags: Vec<&str> = (0..rng.random_range(1..5)).map(|_| pick(&mut rng)).collect();

            json!({
                "id": id,
                "customer": {
                    "name": format!("{} {}", pick(&mut rng), pick(&mut rng)),
                    "vip": rng.random_bool(0.2),
                },
                "note": format!("<b>{}</b> & \"{}\"", pick(&mut rng), pick(&mut rng)),
                "lines": lines,
                "tags": tags,
            })
        })
        .collect()
}

fn pick(rng: &mut StdRng) -> &'static str {
    WORDS.choose(rng).copied().unwrap_or("amber")
}
