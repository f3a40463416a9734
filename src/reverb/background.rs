//! The reverb's background worker thread: drains whatever input the render
//! thread has buffered and runs the stages past the real-time frame limit,
//! writing their output into a ring the render thread merges in on its own
//! schedule. Grounded on LabSound's `ReverbConvolver` background thread,
//! which wakes on a condition variable the audio thread signals after
//! `try_lock`-buffering each quantum (spec §4.9/§5): the render thread must
//! never block on this worker, so every point of contact here is either a
//! `try_lock` from the render side or a notify that is safe to miss.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::scatter_add;
use super::stage::ReverbConvolverStage;

struct Shared {
    input_queue: Mutex<VecDeque<f32>>,
    output_ring: Mutex<Vec<f32>>,
    ring_len: usize,
    wake: Mutex<()>,
    condvar: Condvar,
    stop: AtomicBool,
}

/// Owns the background stages and the thread that drives them. Dropping
/// this joins the thread (bounded by the condvar's poll timeout).
pub struct BackgroundWorker {
    shared: std::sync::Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub fn spawn(mut stages: Vec<ReverbConvolverStage>, ring_len: usize) -> Self {
        let shared = std::sync::Arc::new(Shared {
            input_queue: Mutex::new(VecDeque::new()),
            output_ring: Mutex::new(vec![0.; ring_len]),
            ring_len,
            wake: Mutex::new(()),
            condvar: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("reverb-background".into())
            .spawn(move || {
                loop {
                    let guard = worker_shared.wake.lock().unwrap();
                    let _ = worker_shared
                        .condvar
                        .wait_timeout(guard, Duration::from_millis(50))
                        .unwrap();

                    if worker_shared.stop.load(Ordering::Acquire) {
                        break;
                    }

                    let chunk: Vec<f32> = {
                        let mut q = worker_shared.input_queue.lock().unwrap();
                        q.drain(..).collect()
                    };
                    if chunk.is_empty() {
                        continue;
                    }

                    let mut outputs = Vec::new();
                    for stage in stages.iter_mut() {
                        outputs.extend(stage.feed(&chunk));
                    }

                    if !outputs.is_empty() {
                        let mut ring = worker_shared.output_ring.lock().unwrap();
                        for output in outputs {
                            scatter_add(&mut ring, worker_shared.ring_len, output.start, &output.samples);
                        }
                    }
                }
            })
            .expect("failed to spawn reverb background thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Hand the render thread's freshly-rendered input quantum to the
    /// worker. Never blocks: on lock contention the samples are dropped
    /// from the background stages' view (they lag one quantum; the next
    /// call's `try_lock` is the recovery path, per spec §4.9).
    pub fn push_input(&self, chunk: &[f32]) {
        if let Ok(mut queue) = self.shared.input_queue.try_lock() {
            queue.extend(chunk.iter().copied());
        }
        self.shared.condvar.notify_one();
    }

    /// Read and clear `len` samples starting at `start` (mod the ring
    /// length) from the background output ring, if it is not currently
    /// locked by the worker thread. Returns `None` on contention — the
    /// caller simply contributes silence for this quantum's background
    /// portion and tries again next time.
    pub fn take_output(&self, start: usize, len: usize) -> Option<Vec<f32>> {
        let mut ring = self.shared.output_ring.try_lock().ok()?;
        let ring_len = self.shared.ring_len;
        let mut out = Vec::with_capacity(len);
        let mut pos = start % ring_len;
        for _ in 0..len {
            out.push(ring[pos]);
            ring[pos] = 0.;
            pos = (pos + 1) % ring_len;
        }
        Some(out)
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.condvar.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::analysis::Fft;

    #[test]
    fn test_background_worker_processes_pushed_input() {
        let block_size = 8;
        let fft = Arc::new(Fft::new(block_size * 2));
        let mut taps = vec![0f32; block_size];
        taps[0] = 1.0;
        let stage = ReverbConvolverStage::new_fft(fft, &taps, block_size, 0, true);

        let worker = BackgroundWorker::spawn(vec![stage], 4096);

        let mut input = vec![0f32; block_size];
        input[0] = 1.0;
        worker.push_input(&input);

        // give the worker thread a chance to wake and process
        std::thread::sleep(Duration::from_millis(200));

        let out = worker.take_output(0, block_size).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-3, "expected identity passthrough, got {:?}", out);
    }
}
