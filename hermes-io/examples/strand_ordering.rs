//! Demonstrates the engine's two submission lanes: plain `post` runs on
//! any worker in any order, `post_serialized` runs one-at-a-time in
//! submission order.
//!
//! Run with: cargo run --example strand_ordering

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hermes_io::IoEngine;

fn main() -> hermes_io::Result<()> {
    let engine = IoEngine::new()?;
    engine.run()?;

    let unordered = Arc::new(AtomicUsize::new(0));
    for i in 0..8 {
        let unordered = Arc::clone(&unordered);
        engine.post(move || {
            unordered.fetch_add(1, Ordering::SeqCst);
            println!("[post] task {} on {:?}", i, std::thread::current().name());
        });
    }

    for i in 0..8 {
        engine.post_serialized(move || {
            // these lines always print 0..8 in order
            println!("[strand] task {}", i);
        });
    }

    std::thread::sleep(Duration::from_millis(300));
    println!("unordered tasks run: {}", unordered.load(Ordering::SeqCst));

    engine.stop();
    Ok(())
}
