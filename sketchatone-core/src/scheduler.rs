// Copyright 2025 Amiable
// SPDX-License-Identifier: MIT

//! Note-off scheduler: a single background thread owns a min-heap of
//! pending note-offs keyed by absolute deadline. Re-scheduling the same key
//! cancels the outstanding entry instead of firing an intervening callback.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// `(midi_note, channel_mask)` — channel_mask is a 16-bit bitset so omni
/// sends and single-channel sends use the same key shape.
pub type NoteKey = (u8, u16);

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct ScheduledEvent {
    deadline: Instant,
    note_key: NoteKey,
    generation: u64,
    callback: Option<Callback>,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for ScheduledEvent {}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.deadline.cmp(&self.deadline)
    }
}

struct Shared {
    heap: BinaryHeap<ScheduledEvent>,
    current_generation: HashMap<NoteKey, u64>,
    running: bool,
}

/// A handle to a note-off scheduler. Cloning shares the same background
/// thread and heap; tests construct their own isolated instance rather than
/// reaching for a process-wide singleton.
///
/// The worker thread holds its own permanent `Arc<Mutex<Shared>>` clone, so
/// `Arc::strong_count` on `shared` never reaches zero on its own while the
/// worker is alive. `handle_count` tracks live `Scheduler` handles
/// separately; the worker is only told to stop once that count, not the
/// `Arc`'s, drops to zero.
pub struct Scheduler {
    shared: Arc<Mutex<Shared>>,
    condvar: Arc<Condvar>,
    handle_count: Arc<AtomicUsize>,
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        self.handle_count.fetch_add(1, AtomicOrdering::SeqCst);
        Self {
            shared: Arc::clone(&self.shared),
            condvar: Arc::clone(&self.condvar),
            handle_count: Arc::clone(&self.handle_count),
        }
    }
}

impl Scheduler {
    pub fn start() -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            heap: BinaryHeap::new(),
            current_generation: HashMap::new(),
            running: true,
        }));
        let condvar = Arc::new(Condvar::new());

        let worker_shared = Arc::clone(&shared);
        let worker_condvar = Arc::clone(&condvar);
        std::thread::Builder::new()
            .name("sketchatone-note-scheduler".into())
            .spawn(move || run_worker(worker_shared, worker_condvar))
            .expect("failed to spawn note scheduler thread");

        Self {
            shared,
            condvar,
            handle_count: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Schedule `callback` to run after `delay`. If an entry for `note_key`
    /// is already pending, it is cancelled — the new note-on is never
    /// preceded by a stray note-off for the same key.
    pub fn schedule(&self, note_key: NoteKey, delay: Duration, callback: impl FnOnce() + Send + 'static) {
        let mut guard = self.shared.lock().unwrap();
        let generation = guard.current_generation.get(&note_key).copied().unwrap_or(0) + 1;
        guard.current_generation.insert(note_key, generation);
        guard.heap.push(ScheduledEvent {
            deadline: Instant::now() + delay,
            note_key,
            generation,
            callback: Some(Box::new(callback)),
        });
        self.condvar.notify_one();
    }

    /// Cancel a pending note-off for `note_key` without scheduling a new one.
    pub fn cancel(&self, note_key: NoteKey) -> bool {
        let mut guard = self.shared.lock().unwrap();
        if guard.current_generation.remove(&note_key).is_some() {
            self.condvar.notify_one();
            true
        } else {
            false
        }
    }

    pub fn cancel_all(&self) {
        let mut guard = self.shared.lock().unwrap();
        guard.current_generation.clear();
        self.condvar.notify_one();
    }

    pub fn stop(&self) {
        let mut guard = self.shared.lock().unwrap();
        guard.running = false;
        guard.heap.clear();
        guard.current_generation.clear();
        self.condvar.notify_all();
    }
}

fn run_worker(shared: Arc<Mutex<Shared>>, condvar: Arc<Condvar>) {
    loop {
        let due = {
            let mut guard = shared.lock().unwrap();
            loop {
                if !guard.running {
                    return;
                }

                while let Some(top) = guard.heap.peek() {
                    let still_current = guard.current_generation.get(&top.note_key) == Some(&top.generation);
                    if still_current {
                        break;
                    }
                    guard.heap.pop();
                }

                let Some(top) = guard.heap.peek() else {
                    guard = condvar.wait(guard).unwrap();
                    continue;
                };

                let now = Instant::now();
                if top.deadline <= now {
                    let mut event = guard.heap.pop().unwrap();
                    guard.current_generation.remove(&event.note_key);
                    break event.callback.take();
                }

                let (g, timeout) = condvar.wait_timeout(guard, top.deadline - now).unwrap();
                guard = g;
                let _ = timeout;
            }
        };

        if let Some(callback) = due {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
                tracing::error!("note-off scheduler callback panicked; continuing");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Only the last surviving handle stops the worker. The worker
        // thread's own Arc clone means Arc::strong_count never reflects
        // handle count alone, so this uses a dedicated counter instead.
        if self.handle_count.fetch_sub(1, AtomicOrdering::SeqCst) == 1 {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let sched = Scheduler::start();
        let (tx, rx) = mpsc::channel();
        sched.schedule((60, 1), Duration::from_millis(20), move || {
            tx.send(()).ok();
        });
        rx.recv_timeout(Duration::from_millis(500)).expect("callback should fire");
    }

    #[test]
    fn reschedule_cancels_previous() {
        let sched = Scheduler::start();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        sched.schedule((60, 1), Duration::from_millis(200), move || {
            tx.send("first").ok();
        });
        sched.schedule((60, 1), Duration::from_millis(20), move || {
            tx2.send("second").ok();
        });
        let got = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(got, "second");
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn cancel_prevents_firing() {
        let sched = Scheduler::start();
        let (tx, rx) = mpsc::channel::<()>();
        sched.schedule((61, 1), Duration::from_millis(30), move || {
            tx.send(()).ok();
        });
        assert!(sched.cancel((61, 1)));
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn independent_keys_both_fire() {
        let sched = Scheduler::start();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        sched.schedule((60, 1), Duration::from_millis(10), move || tx.send(60).ok().unwrap());
        sched.schedule((61, 1), Duration::from_millis(10), move || tx2.send(61).ok().unwrap());
        let mut got = vec![rx.recv_timeout(Duration::from_millis(200)).unwrap()];
        got.push(rx.recv_timeout(Duration::from_millis(200)).unwrap());
        got.sort();
        assert_eq!(got, vec![60, 61]);
    }
}
