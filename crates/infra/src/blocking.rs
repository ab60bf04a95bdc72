//! Sync-over-async bridge for the store traits.
//!
//! The `EventStore`/cursor traits are synchronous but their Postgres
//! implementations are async, and the handlers calling them run on a tokio
//! runtime where a plain `Handle::block_on` panics. On the multi-thread
//! runtime the executor is told the worker will block; elsewhere the wait
//! moves to a scoped thread (only safe for futures that do not depend on
//! the blocked thread driving IO, which holds for the multi-thread runtime
//! used in production).

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};

pub(crate) fn run<F>(handle: &Handle, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    match handle.runtime_flavor() {
        RuntimeFlavor::MultiThread => tokio::task::block_in_place(|| handle.block_on(future)),
        _ => std::thread::scope(|scope| {
            match scope.spawn(|| handle.block_on(future)).join() {
                Ok(out) => out,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }),
    }
}
