//! One rendering cycle over a snapshot of live surfaces.
//!
//! Paint runs sequentially on the calling (render) thread. Buffer swaps are
//! parallelized across a bounded worker pool because some OpenGL drivers
//! block a swap until vertical retrace; swapping N surfaces serially would
//! cost up to N retrace waits, while parallel dispatch overlaps them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use frame_pacer::{CycleMeasurement, CycleReport};
use surface_protocol::{ErrorSeverity, ErrorSink, Surface};

struct SwapJob {
    surface: Arc<dyn Surface>,
    error_sink: Arc<dyn ErrorSink>,
    done: Sender<()>,
}

/// Workers are stateless: each job is a single `swap` call, then the job's
/// done token drops. The pool grows on demand and never shrinks.
struct SwapWorkerPool {
    job_sender: Sender<SwapJob>,
    job_receiver: Receiver<SwapJob>,
    workers: Vec<JoinHandle<()>>,
}

impl SwapWorkerPool {
    fn new() -> Self {
        let (job_sender, job_receiver) = unbounded();
        Self {
            job_sender,
            job_receiver,
            workers: Vec::new(),
        }
    }

    fn grow_to(&mut self, target_workers: usize) {
        while self.workers.len() < target_workers {
            let worker_index = self.workers.len();
            let job_receiver = self.job_receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("swap-worker-{worker_index}"))
                .spawn(move || {
                    for job in job_receiver.iter() {
                        if let Err(error) = job.surface.swap() {
                            job.error_sink.report(ErrorSeverity::Recoverable, &error);
                        }
                        let _ = job.done.send(());
                    }
                })
                .unwrap_or_else(|error| panic!("spawn swap worker {worker_index}: {error}"));
            self.workers.push(worker);
        }
    }

    fn dispatch(&self, job: SwapJob) {
        self.job_sender
            .send(job)
            .unwrap_or_else(|_| panic!("swap worker pool disconnected"));
    }

    fn join(self) {
        // Closing the job channel lets every worker's iterator end.
        let SwapWorkerPool {
            job_sender,
            job_receiver,
            workers,
        } = self;
        drop(job_sender);
        drop(job_receiver);
        for worker in workers {
            worker.join().unwrap_or_else(|_| panic!("swap worker panicked"));
        }
    }
}

pub struct SwapScheduler {
    swap_single_threaded: bool,
    error_sink: Arc<dyn ErrorSink>,
    pool: Option<SwapWorkerPool>,
}

impl SwapScheduler {
    pub fn new(swap_single_threaded: bool, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            swap_single_threaded,
            error_sink,
            pool: None,
        }
    }

    /// Number of live swap workers. Zero until a parallel cycle with more
    /// than one surface has run.
    pub fn swap_worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.workers.len())
    }

    /// Paint every surface in order, then swap them all, and report how long
    /// each phase took.
    ///
    /// A surface whose paint or swap fails is reported through the error
    /// sink and skipped for the remainder of the cycle; the other surfaces
    /// are still attempted. One misbehaving surface must not block redraw of
    /// the rest.
    pub fn run_cycle(&mut self, surfaces: &[Arc<dyn Surface>]) -> CycleReport {
        if surfaces.is_empty() {
            return CycleReport::Idle;
        }

        let cycle_started = Instant::now();
        let mut painted: Vec<Arc<dyn Surface>> = Vec::with_capacity(surfaces.len());
        for surface in surfaces {
            match surface.paint() {
                Ok(()) => painted.push(surface.clone()),
                Err(error) => {
                    self.error_sink.report(ErrorSeverity::Recoverable, &error);
                }
            }
        }
        let paint = cycle_started.elapsed();

        let swap_started = Instant::now();
        if self.swap_single_threaded || painted.len() <= 1 {
            for surface in &painted {
                self.swap_one(surface);
            }
        } else {
            self.swap_parallel(&painted);
        }
        let swap = swap_started.elapsed();

        CycleReport::Completed(CycleMeasurement { paint, swap })
    }

    /// Dispatch every surface but the first onto the pool, swap the first on
    /// the calling thread, then wait for all dispatched swaps to finish.
    fn swap_parallel(&mut self, surfaces: &[Arc<dyn Surface>]) {
        let dispatched = surfaces.len() - 1;
        let pool = self.pool.get_or_insert_with(SwapWorkerPool::new);
        pool.grow_to(dispatched);

        let (done_sender, done_receiver) = bounded(dispatched);
        for surface in &surfaces[1..] {
            pool.dispatch(SwapJob {
                surface: surface.clone(),
                error_sink: self.error_sink.clone(),
                done: done_sender.clone(),
            });
        }
        drop(done_sender);

        self.swap_one(&surfaces[0]);

        // The channel disconnects once every job has sent (or dropped) its
        // done token.
        while done_receiver.recv().is_ok() {}
    }

    fn swap_one(&self, surface: &Arc<dyn Surface>) {
        if let Err(error) = surface.swap() {
            self.error_sink.report(ErrorSeverity::Recoverable, &error);
        }
    }

    /// Terminate the worker pool deterministically. Idempotent; also runs on
    /// drop.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
    }
}

impl Drop for SwapScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
