#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use evloop::{Callback, Context, Event};
use parking_lot::Mutex;

/// Upper bound for waiting on work done by another thread.
pub const SETTLE: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Callback appending `(name, id, payload)` to a shared log.
pub fn recorder(log: &Arc<Mutex<Vec<(String, i32, Vec<u8>)>>>, name: &str) -> Callback {
    let log = Arc::clone(log);
    let label = name.to_string();
    Callback::named(name.to_string(), move |_: &Context, ev: &Event<'_>| {
        log.lock().push((label.clone(), ev.id, ev.bytes().to_vec()));
    })
}
