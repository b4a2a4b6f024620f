use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};

/// Cooperative cancellation flag shared between the caller and the worker pool.
/// Workers check it before taking the next item; an item already in progress
/// always runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Runs `f` over `items` on at most `workers` threads. Results come back in
/// input order; items never started because of cancellation are absent.
pub fn run_bounded<T, R, F>(items: Vec<T>, workers: usize, cancel: &CancelToken, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, total);

    let queue: Mutex<VecDeque<(usize, T)>> = Mutex::new(items.into_iter().enumerate().collect());
    let (tx, rx) = mpsc::channel::<(usize, R)>();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let f = &f;
            scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some((idx, item)) = next else {
                        break;
                    };
                    if tx.send((idx, f(item))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut out: Vec<(usize, R)> = rx.into_iter().collect();
    out.sort_by_key(|(idx, _)| *idx);
    out.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[test]
    fn results_keep_input_order() {
        let out = run_bounded((0..32).collect(), 4, &CancelToken::new(), |n: u32| {
            std::thread::sleep(Duration::from_millis(u64::from(32 - n) % 5));
            n * 2
        });
        assert_eq!(out, (0..32).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_worker_limit() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded((0..16).collect::<Vec<u32>>(), 3, &CancelToken::new(), |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn cancellation_stops_dequeuing_but_finishes_current_item() {
        let cancel = CancelToken::new();
        let out = run_bounded((0..10).collect::<Vec<u32>>(), 1, &cancel, |n| {
            if n == 2 {
                cancel.cancel();
            }
            n
        });
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn empty_input_spawns_nothing() {
        let out: Vec<u8> = run_bounded(Vec::<u8>::new(), 4, &CancelToken::new(), |n| n);
        assert!(out.is_empty());
    }
}
