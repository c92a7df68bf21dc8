#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use minijinja::Environment;

mod utils;

fn minijinja_benchmark(c: &mut Criterion) {
    // `.html` names switch on auto-escaping, matching the other engines.
    let mut env = Environment::new();
    env.add_template("row.html", include_str!("row.jinja")).unwrap();
    env.add_template("order.html", include_str!("order.jinja"))
        .unwrap();

    let orders = utils::generate_orders(100);

    let mut group = c.benchmark_group("Order Listing");
    group.sample_size(50);

    group.bench_function("minijinja_render", |b| {
        b.iter(|| {
            let template = env.get_template("order.html").unwrap();
            for order in &orders {
                black_box(template.render(order).unwrap());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, minijinja_benchmark);
criterion_main!(benches);
