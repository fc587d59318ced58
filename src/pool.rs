use crate::shutdown::CancelToken;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, warn};

pub type PartJob<T> = Box<dyn FnOnce(&CancelToken) -> Result<T> + Send + 'static>;

#[derive(Debug)]
pub struct PartResult<T> {
    pub index: usize,
    pub outcome: Result<T>,
}

/// Counting semaphore over a bounded channel pre-filled with tokens.
#[derive(Debug, Clone)]
pub struct Limiter {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            let _ = tx.send(());
        }
        Self { tx, rx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Blocks until a permit is free or `stop` disconnects.
    fn acquire(&self, stop: &Receiver<()>) -> Option<Permit> {
        select! {
            recv(self.rx) -> token => token.ok().map(|_| Permit { tx: self.tx.clone() }),
            recv(stop) -> _ => None,
        }
    }
}

struct Permit {
    tx: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

struct PoolEntry {
    name: String,
    cancel: CancelToken,
    // dropping this wakes workers blocked on the queue or the limiter
    stop: Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

/// A resource paired with the pool working on it.
///
/// Results arrive on [`AssignedPool::results`] in completion order; the
/// iterator ends once every worker has exited, which is the resource's
/// completion signal.
pub struct AssignedPool<T> {
    name: String,
    worker_count: usize,
    cancel: CancelToken,
    jobs: Option<Sender<(usize, PartJob<T>)>>,
    results: Receiver<PartResult<T>>,
}

impl<T> AssignedPool<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue one job per part, indexed by position. Can be called once; the
    /// queue is closed afterwards so idle workers exit.
    pub fn dispatch(&mut self, jobs: Vec<PartJob<T>>) {
        let Some(tx) = self.jobs.take() else {
            warn!("pool {} already dispatched", self.name);
            return;
        };
        for (index, job) in jobs.into_iter().enumerate() {
            if tx.send((index, job)).is_err() {
                break;
            }
        }
    }

    pub fn results(&self) -> crossbeam_channel::Iter<'_, PartResult<T>> {
        self.results.iter()
    }

    /// Stop scheduling parts; running subprocesses are killed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct PoolManager {
    shutdown: CancelToken,
    limiter: Limiter,
    pools: Mutex<Vec<PoolEntry>>,
}

impl PoolManager {
    pub fn new(max_parallel_parts: usize, shutdown: CancelToken) -> Self {
        Self {
            shutdown,
            limiter: Limiter::new(max_parallel_parts),
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Spawn a pool of `worker_count` workers for `name` and register it.
    pub fn assign<T: Send + 'static>(
        &self,
        name: &str,
        worker_count: usize,
    ) -> Result<AssignedPool<T>> {
        if self.shutdown.is_cancelled() {
            return Err(anyhow!("shutdown requested; not assigning pool {name}"));
        }
        // a stale pool under the same name would otherwise leak its workers
        self.release_by_name(name);

        let worker_count = worker_count.max(1);
        let cancel = self.shutdown.child();
        let (job_tx, job_rx) = unbounded::<(usize, PartJob<T>)>();
        let (res_tx, res_rx) = unbounded::<PartResult<T>>();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let mut workers = Vec::with_capacity(worker_count);
        for w in 0..worker_count {
            let jobs = job_rx.clone();
            let results = res_tx.clone();
            let stop = stop_rx.clone();
            let worker_cancel = cancel.clone();
            let limiter = self.limiter.clone();
            let handle = std::thread::Builder::new()
                .name(format!("part-worker-{w}"))
                .spawn(move || worker_loop(jobs, results, stop, worker_cancel, limiter))
                .with_context(|| format!("spawning worker {w} for {name}"));
            match handle {
                Ok(h) => workers.push(h),
                Err(err) => {
                    cancel.cancel();
                    drop(stop_tx);
                    for h in workers {
                        let _ = h.join();
                    }
                    return Err(err);
                }
            }
        }

        debug!("assigned pool {name} with {worker_count} workers");
        self.lock().push(PoolEntry {
            name: name.to_string(),
            cancel: cancel.clone(),
            stop: stop_tx,
            workers,
        });

        Ok(AssignedPool {
            name: name.to_string(),
            worker_count,
            cancel,
            jobs: Some(job_tx),
            results: res_rx,
        })
    }

    /// Terminate and deregister the pool for `name`. Returns whether one was
    /// registered.
    pub fn release_by_name(&self, name: &str) -> bool {
        let released: Vec<PoolEntry> = {
            let mut pools = self.lock();
            let (gone, kept): (Vec<_>, Vec<_>) =
                pools.drain(..).partition(|p| p.name == name);
            *pools = kept;
            gone
        };
        let any = !released.is_empty();
        for entry in released {
            terminate(entry);
        }
        any
    }

    /// Terminate every registered pool. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let released: Vec<PoolEntry> = self.lock().drain(..).collect();
        let n = released.len();
        for entry in released {
            terminate(entry);
        }
        if n > 0 {
            debug!("released {n} pools");
        }
        n
    }

    pub fn active(&self) -> Vec<String> {
        self.lock().iter().map(|p| p.name.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PoolEntry>> {
        self.pools.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn terminate(entry: PoolEntry) {
    let PoolEntry {
        name,
        cancel,
        stop,
        workers,
    } = entry;
    cancel.cancel();
    drop(stop);
    for h in workers {
        if h.join().is_err() {
            warn!("worker thread for {name} panicked");
        }
    }
    debug!("pool {name} terminated");
}

fn worker_loop<T>(
    jobs: Receiver<(usize, PartJob<T>)>,
    results: Sender<PartResult<T>>,
    stop: Receiver<()>,
    cancel: CancelToken,
    limiter: Limiter,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let (index, job) = select! {
            recv(jobs) -> msg => match msg {
                Ok(m) => m,
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        };
        let Some(_permit) = limiter.acquire(&stop) else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }

        let job_cancel = cancel.clone();
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(move || job(&job_cancel))) {
            Ok(r) => r,
            Err(panic) => Err(anyhow!("part worker panicked: {}", panic_message(&*panic))),
        };
        if results.send(PartResult { index, outcome }).is_err() {
            break;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
