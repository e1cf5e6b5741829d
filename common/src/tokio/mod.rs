// Thin helpers over the tokio runtime so every long-lived task is named in
// the logs

use std::future::Future;

use log::trace;

pub use ::tokio::select;
pub use ::tokio::sync;

use ::tokio::task::JoinHandle;

// Spawn a task with a name traced at startup and exit
pub fn spawn_task<F>(name: impl Into<String>, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let name = name.into();
    ::tokio::spawn(async move {
        if log::log_enabled!(log::Level::Trace) {
            trace!("Starting task {}", name);
        }
        let res = future.await;
        if log::log_enabled!(log::Level::Trace) {
            trace!("Task {} has exited", name);
        }
        res
    })
}
