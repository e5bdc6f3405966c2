// src/streaming/workers.rs
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, info, trace};

use super::context::GenContext;
use super::priority::Observer;
use super::queue::WorkQueue;
use crate::error::Result;

pub struct GenerationWorkerPool {
    queue: Arc<WorkQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl GenerationWorkerPool {
    pub fn spawn(threads: usize, queue: Arc<WorkQueue>, ctx: Arc<GenContext>, observer: Arc<Observer>) -> Result<Self> {
        let threads = threads.max(1);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let queue = queue.clone();
            let ctx = ctx.clone();
            let observer = observer.clone();
            let handle = thread::Builder::new()
                .name(format!("chunk-gen-{i}"))
                .spawn(move || worker_loop(&queue, &ctx, &observer))?;
            handles.push(handle);
        }
        info!("started {threads} chunk generation workers");
        Ok(Self { queue, handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wakes every worker with `None` and joins them. A job already running finishes first.
    pub fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.queue.shutdown();
        for h in self.handles.drain(..) {
            if h.join().is_err() {
                error!("chunk generation worker panicked outside a job");
            }
        }
        info!("chunk generation workers stopped");
    }
}

impl Drop for GenerationWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &WorkQueue, ctx: &GenContext, observer: &Observer) {
    while let Some(req) = queue.extract_max() {
        let t_start = Instant::now();

        match panic::catch_unwind(AssertUnwindSafe(|| ctx.process(&req))) {
            Ok(Ok(())) => {
                ctx.counters.done.fetch_add(1, Ordering::Relaxed);
                trace!("{:?} {} in {:.2} ms", req.kind(), req.key, t_start.elapsed().as_secs_f64() * 1000.0);
            }
            Ok(Err(e)) => {
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("could not generate {}: {e}", req.key);
            }
            Err(payload) => {
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!("chunk generation panicked for {}: {msg}", req.key);
            }
        }

        // Keep pending priorities in step with the moving observer.
        queue.update_priority(|r| observer.priority(&r.key));
    }
}
