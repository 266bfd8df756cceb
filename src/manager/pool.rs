//! Bounded worker pool for bulk load/save passes.

use std::thread;

use crossbeam::channel;

/// Run `work` over `items` on at most `threads` scoped threads
///
/// Returns once every item is processed. Output order is unspecified.
pub(crate) fn run<I, O, F>(threads: usize, items: Vec<I>, work: F) -> Vec<O>
where
    I: Send,
    O: Send,
    F: Fn(I) -> O + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let threads = threads.clamp(1, items.len());

    // Queue every job up front; workers drain until the queue is empty
    let (job_tx, job_rx) = channel::unbounded();
    for item in items {
        let _ = job_tx.send(item);
    }
    drop(job_tx);

    let (out_tx, out_rx) = channel::unbounded();
    thread::scope(|scope| {
        for _ in 0..threads {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            let work = &work;
            scope.spawn(move || {
                for item in job_rx.iter() {
                    let _ = out_tx.send(work(item));
                }
            });
        }
    });
    drop(out_tx);

    out_rx.iter().collect()
}
