
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fixtures::{data, get_engine};
use futures::StreamExt;
use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::FutureExt;
use minidust::{
    Context, Engine, LoadFuture, Loaded, Loader, MinidustError, Progress, Reply, Value,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use rand::seq::SliceRandom;

type Senders = HashMap<i64, oneshot::Sender<String>>;

/// Registers `{@wait/}`, which defers until the test sends text for the
/// current item.
fn waiting_engine() -> (Engine, Arc<Mutex<Senders>>) {
    let engine = get_engine();
    let senders = Arc::new(Mutex::new(HashMap::new()));
    let registry = Arc::clone(&senders);
    engine.register_helper("wait", move |chunk, ctx, _, _| {
        let id = ctx.current().and_then(Value::as_i64).unwrap_or_default();
        let (tx, rx) = oneshot::channel();
        registry.lock().insert(id, tx);
        chunk.defer_text(async move {
            rx.await
                .map_err(|_| MinidustError::helper("sender dropped"))
        })?;
        Ok(Reply::Written)
    });
    (engine, senders)
}

fn items(n: i64) -> Value {
    data([("items", Value::from((0..n).map(Value::from).collect::<Vec<_>>()))])
}

fn expected(n: i64) -> String {
    let body: String = (0..n).map(|i| format!("[v{i}]")).collect();
    format!("A{body}Z")
}

/// Completes the deferred items in `order`, checking after every step that
/// only a prefix of the final output has been delivered.
fn complete_in_order(order: &[i64]) -> String {
    let n = i64::try_from(order.len()).unwrap();
    let (engine, senders) = waiting_engine();
    engine.add_template("t", "A{#items}[{@wait/}]{/items}Z").unwrap();

    let seen = Rc::new(RefCell::new(String::new()));
    let mut stream = engine.stream("t", items(n));
    let sink = Rc::clone(&seen);
    stream.on_data(move |text| sink.borrow_mut().push_str(text));

    let full = expected(n);
    for id in order {
        assert_eq!(stream.run_until_stalled(), Progress::Pending);
        assert!(full.starts_with(seen.borrow().as_str()), "out of order: {}", seen.borrow());

        let tx = senders.lock().remove(id).unwrap();
        tx.send(format!("v{id}")).unwrap();
    }
    assert_eq!(stream.run_until_stalled(), Progress::Complete);
    seen.take()
}

#[test]
#[ntest::timeout(1000)]
fn test_nothing_flushes_before_the_first_slot() {
    let (engine, senders) = waiting_engine();
    engine.add_template("t", "A{#items}[{@wait/}]{/items}Z").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut stream = engine.stream("t", items(3));
    let sink = Rc::clone(&seen);
    stream.on_data(move |text| sink.borrow_mut().push(text.to_owned()));

    assert_eq!(stream.run_until_stalled(), Progress::Pending);
    for id in [2_i64, 1] {
        senders.lock().remove(&id).unwrap().send(format!("v{id}")).unwrap();
        assert_eq!(stream.run_until_stalled(), Progress::Pending);
    }
    assert!(seen.borrow().is_empty(), "later slots must wait for the first");

    senders.lock().remove(&0_i64).unwrap().send("v0".to_owned()).unwrap();
    assert_eq!(stream.run_until_stalled(), Progress::Complete);
    assert_eq!(*seen.borrow(), vec!["A[v0][v1][v2]Z".to_owned()], "ready chunks are coalesced");
}

#[test]
#[ntest::timeout(1000)]
fn test_random_completion_order() {
    let mut order: Vec<i64> = (0..8).collect();
    order.shuffle(&mut rand::rng());
    assert_eq!(complete_in_order(&order), expected(8), "order was {order:?}");
}

proptest! {
    #[test]
    fn prop_output_matches_document_order(order in Just((0..6).collect::<Vec<i64>>()).prop_shuffle()) {
        prop_assert_eq!(complete_in_order(&order), expected(6));
    }
}

#[test]
#[ntest::timeout(1000)]
fn test_synchronous_defer_runs_inline() {
    let engine = get_engine();
    engine.register_helper("now", |chunk, _, _, _| {
        chunk.defer(async { Ok(|chunk: &mut minidust::Chunk<'_>| chunk.write("now")) })?;
        Ok(Reply::Written)
    });

    let mut stream = engine.render_source("<{@now/}>", Context::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    stream.on_data(move |text| sink.borrow_mut().push(text.to_owned()));

    assert_eq!(stream.run_until_stalled(), Progress::Complete);
    assert_eq!(*seen.borrow(), vec!["<now>".to_owned()]);
}

#[test]
#[ntest::timeout(1000)]
fn test_stream_yields_pieces_in_order() {
    let (engine, senders) = waiting_engine();
    engine.add_template("t", "A{#items}[{@wait/}]{/items}Z").unwrap();

    let mut stream = engine.stream("t", items(2));
    let first = stream.next().now_or_never();
    assert!(first.is_none(), "nothing is ready yet");

    senders.lock().remove(&0_i64).unwrap().send("v0".to_owned()).unwrap();
    senders.lock().remove(&1_i64).unwrap().send("v1".to_owned()).unwrap();

    let pieces: Vec<String> = block_on(stream.map(Result::unwrap).collect());
    assert_eq!(pieces.concat(), "A[v0][v1]Z");
}

#[test]
#[ntest::timeout(1000)]
fn test_deferred_failure_discards_output() {
    let (engine, senders) = waiting_engine();
    engine.add_template("t", "A{#items}[{@wait/}]{/items}Z").unwrap();

    let seen = Rc::new(RefCell::new(String::new()));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let mut stream = engine.stream("t", items(3));
    let (data_sink, error_sink) = (Rc::clone(&seen), Rc::clone(&errors));
    stream
        .on_data(move |text| data_sink.borrow_mut().push_str(text))
        .on_error(move |error| error_sink.borrow_mut().push(error.clone()))
        .on_end(|| panic!("a failed render never ends"));

    assert_eq!(stream.run_until_stalled(), Progress::Pending);
    senders.lock().remove(&0_i64).unwrap().send("v0".to_owned()).unwrap();
    assert_eq!(stream.run_until_stalled(), Progress::Pending);
    assert_eq!(*seen.borrow(), "A[v0");

    drop(senders.lock().remove(&1_i64));
    assert_eq!(stream.run_until_stalled(), Progress::Failed);

    senders.lock().remove(&2_i64).unwrap().send("v2".to_owned()).ok();
    assert_eq!(stream.run_until_stalled(), Progress::Failed);

    assert_eq!(*seen.borrow(), "A[v0", "nothing after the failure is delivered");
    assert_eq!(
        *errors.borrow(),
        vec![MinidustError::Helper {
            helper: None,
            template: None,
            message: "sender dropped".to_owned(),
        }]
    );
}

#[test]
#[ntest::timeout(1000)]
fn test_render_future_reports_deferred_error() {
    let engine = get_engine();
    engine.register_helper("fail_later", |chunk, _, _, _| {
        chunk.defer_text(async { Err(MinidustError::helper("late")) })?;
        Ok(Reply::Written)
    });
    engine.add_template("t", "x{@fail_later/}y").unwrap();

    let result = block_on(engine.render("t", Context::default()));
    assert!(matches!(result, Err(MinidustError::Helper { ref message, .. }) if message == "late"));
}

/// Loader that answers once the test releases it, counting calls.
struct GatedLoader {
    calls: Arc<AtomicUsize>,
    gate: Arc<Mutex<Option<oneshot::Receiver<String>>>>,
}

impl Loader for GatedLoader {
    fn load(&self, name: &str) -> LoadFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        let name = name.to_owned();
        async move {
            let Some(gate) = gate else {
                return Err(MinidustError::loader(name, "loaded twice"));
            };
            let source = gate
                .await
                .map_err(|_| MinidustError::loader(name, "gate dropped"))?;
            Ok(Loaded::Source(source))
        }
        .boxed_local()
    }
}

#[test]
#[ntest::timeout(1000)]
fn test_concurrent_misses_share_one_load() {
    let engine = get_engine();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();
    engine.set_loader(GatedLoader {
        calls: Arc::clone(&calls),
        gate: Arc::new(Mutex::new(Some(rx))),
    });

    let mut stream = engine.render_source("{>p/}-{>p/}", Context::default());
    let seen = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&seen);
    stream.on_data(move |text| sink.borrow_mut().push_str(text));

    assert_eq!(stream.run_until_stalled(), Progress::Pending);
    tx.send("<{name}>".to_owned()).unwrap();
    assert_eq!(stream.run_until_stalled(), Progress::Complete);
    assert_eq!(*seen.borrow(), "<>-<>");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(engine.get_template("p").is_some());
}

#[test]
#[ntest::timeout(1000)]
fn test_partials_keep_order_across_loads() {
    let engine = get_engine();
    engine.add_template("fast", "F").unwrap();
    let (tx, rx) = oneshot::channel();
    engine.set_loader(GatedLoader {
        calls: Arc::new(AtomicUsize::new(0)),
        gate: Arc::new(Mutex::new(Some(rx))),
    });

    let mut stream = engine.render_source("1{>slow/}2{>fast/}3", Context::default());
    assert_eq!(stream.run_until_stalled(), Progress::Pending);
    tx.send("S".to_owned()).unwrap();

    let out = block_on(stream.into_render()).unwrap();
    assert_eq!(out, "1S2F3");
}
