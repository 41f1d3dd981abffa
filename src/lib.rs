// Allow complex types where needed for comprehensive configuration structs
#![allow(clippy::type_complexity)]

pub mod io;
pub mod zbd;

use std::sync::atomic::{AtomicBool, Ordering};

// Cooperative cancellation flag: set by a Ctrl+C handler in the demo
// binary, polled by the `bench` subcommand's worker threads between
// requests. The Adjuster itself never checks this — cancellation is a
// concern of the caller's submission loop, not of request adjustment.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub fn set_interrupted() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
