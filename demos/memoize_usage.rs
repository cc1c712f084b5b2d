//! Memoizer usage walkthrough.
//!
//! Run with `RUST_LOG=memo_rs=debug cargo run --example memoize_usage` to see
//! the memoizer's log events.

use memo_rs::computation::{from_fn, from_scoped_fn};
use memo_rs::config::MemoizerConfig;
use memo_rs::{CacheMetrics, ComputeScope, Memoizer};
use std::io::Read;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
#[error("network down")]
struct NetworkDown;

fn factorials() {
    println!("== factorials shared across threads ==");
    let memo = Arc::new(Memoizer::init(
        MemoizerConfig {
            name: "factorial",
            segments: 8,
        },
        from_fn(|n: &u64| {
            thread::sleep(Duration::from_millis(100));
            Ok::<_, std::convert::Infallible>((1..=*n).product::<u64>())
        }),
    ));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let memo = Arc::clone(&memo);
            thread::spawn(move || memo.get(&7))
        })
        .collect();
    for handle in handles {
        match handle.join() {
            Ok(Ok(value)) => println!("7! = {}", value),
            Ok(Err(err)) => println!("lookup failed: {}", err),
            Err(_) => println!("lookup thread panicked"),
        }
    }

    for (name, value) in memo.metrics() {
        println!("  {:<14} {}", name, value);
    }
}

fn flaky_network() {
    println!("== failures are retried ==");
    let online = AtomicBool::new(false);
    let memo = Memoizer::init(
        MemoizerConfig {
            name: "flaky",
            segments: 4,
        },
        from_fn(|host: &String| {
            if online.swap(true, Ordering::SeqCst) {
                Ok(format!("response from {}", host))
            } else {
                Err(NetworkDown)
            }
        }),
    );

    let host = "example.invalid".to_string();
    for attempt in 1..=2 {
        match memo.get(&host) {
            Ok(body) => println!("attempt {}: {}", attempt, body),
            Err(err) => println!("attempt {}: {} ({:?})", attempt, err, err.computation_error()),
        }
    }
}

fn cancelled_socket() -> std::io::Result<()> {
    println!("== cancelling a blocked socket read ==");
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let memo = Arc::new(Memoizer::init(
        MemoizerConfig {
            name: "socket",
            segments: 4,
        },
        from_scoped_fn(move |_: &&str, scope: &ComputeScope| {
            let mut stream = TcpStream::connect(addr)?;
            let closer = stream.try_clone()?;
            scope.on_abort(move || {
                let _ = closer.shutdown(Shutdown::Both);
            });
            let mut body = Vec::new();
            stream.read_to_end(&mut body)?;
            Ok::<_, std::io::Error>(body)
        }),
    ));

    let owner = {
        let memo = Arc::clone(&memo);
        thread::spawn(move || memo.get(&"slow-page"))
    };

    let (_silent_peer, _) = listener.accept()?;
    thread::sleep(Duration::from_millis(100));
    println!("cancelled: {}", memo.cancel(&"slow-page"));

    match owner.join() {
        Ok(Ok(body)) => println!("unexpected body of {} bytes", body.len()),
        Ok(Err(err)) => println!("owner saw: {}", err),
        Err(_) => println!("owner panicked"),
    }
    println!("entries left: {}", memo.len());
    Ok(())
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    factorials();
    flaky_network();
    cancelled_socket()
}
