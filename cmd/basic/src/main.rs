//! Basic costack example
//!
//! Two coroutines ping-pong on the loop's shared stack while a periodic
//! timer reports progress. Ctrl-C stops the loop early.
//!
//! # Environment Variables
//!
//! - `CST_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `CST_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `CST_BUSY_TIMEOUT_MS`, `CST_IDLE_TIMEOUT_MS`, `CST_IDLE_THRESHOLD` - Loop timing

use costack::{kdebug, kerror, kinfo, AsyncCoroutine, EventLoop, LoopStatus, Signal};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const ROUNDS: u32 = 5;

// CST_LOG_LEVEL=debug cargo run -p costack-basic
fn main() {
    println!("=== costack Basic Example ===\n");

    let ev = match EventLoop::new() {
        Ok(ev) => ev,
        Err(e) => {
            kerror!("creating event loop failed: {}", e);
            std::process::exit(1);
        }
    };

    let weak = Rc::downgrade(&ev);
    if let Err(e) = ev.trap_signal(Signal::SIGINT, move || {
        kinfo!("SIGINT, stopping");
        if let Some(ev) = weak.upgrade() {
            ev.quit();
        }
    }) {
        kerror!("trapping SIGINT failed: {}", e);
    }

    // Report Busy while coroutines still run so the loop never backs off
    let finished = Rc::new(Cell::new(0u32));
    let f = finished.clone();
    ev.set_status_callback(move |_| {
        if f.get() < 2 {
            LoopStatus::Busy
        } else {
            LoopStatus::Idle
        }
    });

    // The peer each side resumes; filled in once both exist
    let peers: Rc<RefCell<Vec<AsyncCoroutine>>> = Rc::new(RefCell::new(Vec::new()));

    for side in 0..2usize {
        let my_peers = peers.clone();
        let finished = finished.clone();
        let weak = Rc::downgrade(&ev);
        let co = AsyncCoroutine::new(&ev, move |co| {
            let depth = [side as u8; 256];
            for round in 0..ROUNDS {
                println!("[{}] {} round {}", co.id(), if side == 0 { "ping" } else { "pong" }, round);
                let peer = my_peers.borrow().get(1 - side).cloned();
                if let (Some(peer), Some(ev)) = (peer, weak.upgrade()) {
                    ev.queue_in_loop(move || {
                        if peer.is_suspended() {
                            peer.resume();
                        }
                    });
                }
                co.yield_with_timeout(50);
                kdebug!("[{}] woke, timed_out={}", co.id(), co.timed_out());
            }
            // Stack contents survived every switch
            assert!(depth.iter().all(|&b| b == side as u8));
            finished.set(finished.get() + 1);
            if finished.get() == 2 {
                if let Some(ev) = weak.upgrade() {
                    ev.quit();
                }
            }
        });
        peers.borrow_mut().push(co);
    }

    let ticks = Rc::new(Cell::new(0u32));
    let t = ticks.clone();
    let tick = ev.run_every(20, move || {
        t.set(t.get() + 1);
        kdebug!("tick {}", t.get());
    });

    let first = peers.borrow()[0].clone();
    first.resume();

    let start = costack::now();
    ev.run();
    ev.remove_timer(tick);

    println!("\n=== Summary ===");
    println!("Coroutines finished: {}/2", finished.get());
    println!("Loop iterations:     {}", ev.iteration());
    println!("Timer ticks:         {}", ticks.get());
    println!("Elapsed:             {} ms", costack::now() - start);
}
