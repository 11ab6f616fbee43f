//! Single-threaded background execution context.
//!
//! A `Worker` owns one named thread that handles messages strictly in arrival
//! order. Messages may also be scheduled after a delay and cancelled before they
//! fire. Device completions, retry timers and frame deliveries of a session are
//! all funneled through one worker, so the session never handles two of them at
//! once.
//!
//! A panicking handler is logged and the loop keeps running. Delayed messages that
//! have not fired at shutdown are dropped, which runs their destructors.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Identifier of a delayed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

enum Command<M> {
    Run(M),
    Schedule { id: TimerId, at: Instant, message: M },
    Cancel(TimerId),
    Shutdown,
}

/// Cloneable sender side of a [`Worker`].
pub struct WorkerHandle<M> {
    tx: Sender<Command<M>>,
    next_timer: Arc<AtomicU64>,
    thread: ThreadId,
}

impl<M> Clone for WorkerHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            next_timer: self.next_timer.clone(),
            thread: self.thread,
        }
    }
}

impl<M> std::fmt::Debug for WorkerHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("thread", &self.thread)
            .finish()
    }
}

impl<M: Send + 'static> WorkerHandle<M> {
    /// Queue a message. Returns false (and drops the message) once the worker has
    /// shut down.
    pub fn post(&self, message: M) -> bool {
        self.tx.send(Command::Run(message)).is_ok()
    }

    /// Queue a message to be handled after `delay`.
    pub fn post_delayed(&self, delay: Duration, message: M) -> Option<TimerId> {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let at = Instant::now() + delay;
        self.tx
            .send(Command::Schedule { id, at, message })
            .ok()
            .map(|_| id)
    }

    /// Cancel a delayed message. Unknown or already fired timers are ignored.
    pub fn cancel(&self, id: TimerId) {
        let _ = self.tx.send(Command::Cancel(id));
    }

    pub fn is_worker_thread(&self) -> bool {
        std::thread::current().id() == self.thread
    }
}

/// The worker thread and its queue.
pub struct Worker<M: Send + 'static> {
    handle: WorkerHandle<M>,
    join: Option<JoinHandle<()>>,
    name: String,
}

impl<M: Send + 'static> Worker<M> {
    pub fn spawn<F>(name: &str, handler: F) -> Result<Self>
    where
        F: FnMut(M) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread_name = name.to_string();
        let join = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(rx, handler, &thread_name))
            .with_context(|| format!("spawn worker thread {}", name))?;
        let handle = WorkerHandle {
            tx,
            next_timer: Arc::new(AtomicU64::new(1)),
            thread: join.thread().id(),
        };
        Ok(Self {
            handle,
            join: Some(join),
            name: name.to_string(),
        })
    }

    pub fn handle(&self) -> WorkerHandle<M> {
        self.handle.clone()
    }

    /// Stop accepting work after everything already queued, then join the thread.
    ///
    /// When called from the worker thread itself the thread is detached instead of
    /// joined.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> Result<()> {
        let _ = self.handle.tx.send(Command::Shutdown);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        if self.handle.is_worker_thread() {
            log::warn!("worker {}: shutdown requested from its own thread; detaching", self.name);
            return Ok(());
        }
        join.join()
            .map_err(|_| anyhow::anyhow!("worker {} thread panicked", self.name))
    }
}

impl<M: Send + 'static> Drop for Worker<M> {
    fn drop(&mut self) {
        if let Err(err) = self.stop_and_join() {
            log::error!("{}", err);
        }
    }
}

fn run<M, F>(rx: Receiver<Command<M>>, mut handler: F, name: &str)
where
    F: FnMut(M),
{
    let mut timers: BTreeMap<(Instant, TimerId), M> = BTreeMap::new();
    loop {
        let command = match timers.keys().next().map(|(at, _)| *at) {
            Some(at) => {
                let now = Instant::now();
                if at <= now {
                    if let Some((_, message)) = timers.pop_first() {
                        dispatch(&mut handler, message, name);
                    }
                    continue;
                }
                match rx.recv_timeout(at - now) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Run(message) => dispatch(&mut handler, message, name),
            Command::Schedule { id, at, message } => {
                timers.insert((at, id), message);
            }
            Command::Cancel(id) => timers.retain(|(_, timer), _| *timer != id),
            Command::Shutdown => break,
        }
    }
    if !timers.is_empty() {
        log::debug!("worker {}: dropping {} pending timers", name, timers.len());
    }
}

fn dispatch<M, F>(handler: &mut F, message: M, name: &str)
where
    F: FnMut(M),
{
    if panic::catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
        log::error!("worker {}: message handler panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_worker() -> (Worker<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = Worker::spawn("test-worker", move |value: u32| {
            sink.lock().unwrap().push(value);
        })
        .expect("spawn worker");
        (worker, seen)
    }

    #[test]
    fn messages_are_handled_in_order() {
        let (worker, seen) = recording_worker();
        let handle = worker.handle();
        for value in 0..100 {
            assert!(handle.post(value));
        }
        worker.shutdown().expect("shutdown");
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn delayed_messages_fire_after_immediate_ones() {
        let (worker, seen) = recording_worker();
        let handle = worker.handle();
        handle.post_delayed(Duration::from_millis(30), 2).expect("schedule");
        handle.post(1);
        std::thread::sleep(Duration::from_millis(100));
        worker.shutdown().expect("shutdown");
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let (worker, seen) = recording_worker();
        let handle = worker.handle();
        let id = handle
            .post_delayed(Duration::from_millis(30), 9)
            .expect("schedule");
        handle.cancel(id);
        handle.cancel(id);
        std::thread::sleep(Duration::from_millis(80));
        worker.shutdown().expect("shutdown");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_handler_does_not_stop_the_loop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let worker = Worker::spawn("panicky", move |value: u32| {
            if value == 0 {
                panic!("boom");
            }
            sink.lock().unwrap().push(value);
        })
        .expect("spawn worker");
        let handle = worker.handle();
        handle.post(0);
        handle.post(1);
        worker.shutdown().expect("shutdown");
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn post_after_shutdown_is_rejected() {
        let (worker, _seen) = recording_worker();
        let handle = worker.handle();
        worker.shutdown().expect("shutdown");
        assert!(!handle.post(1));
        assert!(handle.post_delayed(Duration::from_millis(1), 2).is_none());
    }

    #[test]
    fn handle_knows_its_thread() {
        let slot: Arc<Mutex<Option<WorkerHandle<u8>>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::channel();
        let inner = slot.clone();
        let worker = Worker::spawn("whoami", move |_: u8| {
            let handle = inner.lock().unwrap().clone();
            tx.send(handle.map(|h| h.is_worker_thread())).ok();
        })
        .expect("spawn worker");
        *slot.lock().unwrap() = Some(worker.handle());
        assert!(!worker.handle().is_worker_thread());
        worker.handle().post(0);
        let inside = rx.recv_timeout(Duration::from_secs(2)).expect("reply");
        assert_eq!(inside, Some(true));
        slot.lock().unwrap().take();
        worker.shutdown().expect("shutdown");
    }
}
