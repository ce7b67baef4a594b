use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

/// Runs `job` over `items` on at most `limit` scoped worker threads.
///
/// Workers check `stop` before taking the next item; items never started are
/// returned as `None`. Results keep the order of `items`.
pub fn run_bounded<T, R, S, F>(items: &[T], limit: usize, stop: S, job: F) -> Vec<Option<R>>
where
    T: Sync,
    R: Send,
    S: Fn() -> bool + Sync,
    F: Fn(&T) -> R + Sync,
{
    let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    if items.is_empty() {
        return results;
    }
    let workers = limit.clamp(1, items.len());
    let next = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let next = &next;
            let stop = &stop;
            let job = &job;
            scope.spawn(move || {
                loop {
                    if stop() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    if sender.send((index, job(item))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(sender);
        for (index, result) in receiver {
            results[index] = Some(result);
        }
    });

    results
}
