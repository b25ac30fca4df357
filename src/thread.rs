//! Stoppable background threads.

use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// The worker's side of a `ThreadHandle`.
pub struct Shutdown {
    rx: mpsc::Receiver<()>,
}

impl Shutdown {
    /// Sleep for up to `timeout`. Returns true if the thread has been asked
    /// to stop, in which case the worker should return promptly.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Background thread state.
pub struct ThreadHandle {
    /// JoinHandle for the executing thread.
    handle: thread::JoinHandle<()>,
    /// Dropping or sending on this wakes the worker up for good.
    shutdown: mpsc::Sender<()>,
}

impl ThreadHandle {
    /// Join the given thread, blocking until it exits.
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("background thread panicked");
        }
    }

    /// Gracefully shut down the given thread, blocking until it exits.
    ///
    /// It is the responsibility of the worker to poll `Shutdown::wait`.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.join();
    }
}

/// Spawn a named thread executing the provided closure.
pub fn spawn<F>(name: &str, f: F) -> io::Result<ThreadHandle>
where
    F: Send + 'static + FnOnce(Shutdown),
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || f(Shutdown { rx }))?;
    Ok(ThreadHandle {
        handle,
        shutdown: tx,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn shutdown_wakes_the_worker() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let handle = spawn("test-worker", move |shutdown| {
            while !shutdown.wait(Duration::from_secs(3600)) {
                t.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        handle.shutdown();
        assert_eq!(0, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_times_out() {
        let (tx, rx) = mpsc::channel();
        let shutdown = Shutdown { rx };
        assert!(!shutdown.wait(Duration::from_millis(1)));
        tx.send(()).unwrap();
        assert!(shutdown.wait(Duration::from_millis(1)));
    }
}
