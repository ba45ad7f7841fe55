// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the camera thread coordinator
//!
//! Simulated owners run on plain threads; races are provoked with barriers
//! and with gate tasks that hold the worker while the owners move on.

use camera_worker::worker::ContextId;
use camera_worker::{CameraThread, Config, LifecycleObserver, StateKind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, mpsc};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

/// Counts worker threads that are alive right now and the peak
#[derive(Default)]
struct LiveThreads {
    live: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl LifecycleObserver for LiveThreads {
    fn on_context_started(&self, _id: ContextId) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_context_stopped(&self, _id: ContextId) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

fn observed() -> (CameraThread, Arc<LiveThreads>) {
    let threads = Arc::new(LiveThreads::default());
    let camera = CameraThread::with_observer(Config::default(), threads.clone());
    (camera, threads)
}

/// Queue a task that blocks the worker until the returned sender fires
fn gate(camera: &CameraThread, acquire: bool) -> mpsc::Sender<()> {
    let (tx, rx) = mpsc::channel::<()>();
    let task = move || {
        let _ = rx.recv_timeout(WAIT);
    };
    if acquire {
        camera.acquire_and_enqueue(task).unwrap();
    } else {
        camera.enqueue(task).unwrap();
    }
    tx
}

#[test]
fn test_no_thread_before_first_acquire() {
    let (camera, threads) = observed();

    let status = camera.status();
    assert_eq!(status.owners, 0);
    assert_eq!(status.state, StateKind::Idle);
    assert_eq!(status.context, None);
    assert_eq!(status.contexts_started, 0);
    assert_eq!(threads.started.load(Ordering::SeqCst), 0);
}

#[test]
fn test_session_lifecycle_scenario() {
    let (camera, threads) = observed();
    let (tx, rx) = mpsc::channel();

    // Owner A opens the thread
    let a = tx.clone();
    camera.acquire_and_enqueue(move || a.send("A").unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "A");
    let status = camera.status();
    assert_eq!(status.owners, 1);
    assert_eq!(status.state, StateKind::Running);
    let first_context = status.context;

    // Owner B shares it
    let b = tx.clone();
    camera.acquire_and_enqueue(move || b.send("B").unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "B");
    let status = camera.status();
    assert_eq!(status.owners, 2);
    assert_eq!(status.context, first_context);
    assert_eq!(status.contexts_started, 1);

    // A leaves, the thread stays
    camera.release().unwrap();
    let status = camera.status();
    assert_eq!(status.owners, 1);
    assert_eq!(status.state, StateKind::Running);

    // B leaves, the thread shuts itself down
    camera.release().unwrap();
    assert_eq!(camera.status().owners, 0);
    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(camera.status().context, None);
    assert_eq!(threads.live.load(Ordering::SeqCst), 0);

    // Owner C gets a fresh thread
    let c = tx.clone();
    camera.acquire_and_enqueue(move || c.send("C").unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "C");
    let status = camera.status();
    assert_eq!(status.contexts_started, 2);
    assert_ne!(status.context, first_context);

    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(threads.started.load(Ordering::SeqCst), 2);
    assert_eq!(threads.stopped.load(Ordering::SeqCst), 2);
}

#[test]
fn test_enqueue_without_owner_is_rejected() {
    let camera = CameraThread::new(Config::default());
    let ran = Arc::new(AtomicBool::new(false));

    let r = Arc::clone(&ran);
    let err = camera
        .enqueue(move || r.store(true, Ordering::SeqCst))
        .unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(camera.status().state, StateKind::Idle);

    // Run something afterwards to prove the rejected task was dropped
    camera.acquire_and_enqueue(|| {}).unwrap();
    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn test_enqueue_after_last_release_is_rejected() {
    let camera = CameraThread::new(Config::default());
    let tx = gate(&camera, true);
    camera.release().unwrap();

    // Thread is still alive (Stopping) but nobody owns it
    assert_eq!(camera.status().state, StateKind::Stopping);
    assert!(camera.enqueue(|| {}).unwrap_err().is_invalid_state());

    tx.send(()).unwrap();
    assert!(camera.wait_until_idle(WAIT));
}

#[test]
fn test_double_release_is_rejected() {
    let camera = CameraThread::new(Config::default());
    assert!(camera.release().unwrap_err().is_invalid_state());

    camera.acquire_and_enqueue(|| {}).unwrap();
    camera.release().unwrap();
    assert!(camera.release().unwrap_err().is_invalid_state());
    assert_eq!(camera.status().owners, 0);
    assert!(camera.wait_until_idle(WAIT));
}

#[test]
fn test_tasks_run_in_submission_order() {
    let camera = CameraThread::new(Config::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&order);
    camera.acquire_and_enqueue(move || o.lock().unwrap().push(0)).unwrap();
    for i in 1..50 {
        let o = Arc::clone(&order);
        camera.enqueue(move || o.lock().unwrap().push(i)).unwrap();
    }
    camera.release().unwrap();

    // Teardown waits for everything queued before it
    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_pending_tasks_finish_before_teardown() {
    let (camera, threads) = observed();
    let done = Arc::new(AtomicUsize::new(0));

    let tx = gate(&camera, true);
    for _ in 0..5 {
        let done = Arc::clone(&done);
        camera
            .enqueue(move || {
                thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    camera.release().unwrap();
    assert_eq!(threads.live.load(Ordering::SeqCst), 1);

    tx.send(()).unwrap();
    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(done.load(Ordering::SeqCst), 5);
    assert_eq!(threads.live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_acquire_while_stopping_reuses_thread() {
    let (camera, threads) = observed();

    // Keep the worker busy so the teardown marker cannot be reached yet
    let tx = gate(&camera, true);
    let context = camera.status().context;
    camera.release().unwrap();
    assert_eq!(camera.status().state, StateKind::Stopping);

    let (done_tx, done_rx) = mpsc::channel();
    camera
        .acquire_and_enqueue(move || done_tx.send(()).unwrap())
        .unwrap();
    let status = camera.status();
    assert_eq!(status.state, StateKind::Running);
    assert_eq!(status.context, context);

    tx.send(()).unwrap();
    done_rx.recv_timeout(WAIT).unwrap();

    let status = camera.status();
    assert_eq!(status.state, StateKind::Running);
    assert_eq!(status.contexts_started, 1);
    assert_eq!(threads.peak.load(Ordering::SeqCst), 1);

    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
}

#[test]
fn test_panicking_task_does_not_break_queue() {
    let camera = CameraThread::new(Config::default());
    let (tx, rx) = mpsc::channel();

    camera
        .acquire_and_enqueue(|| panic!("lost the camera"))
        .unwrap();
    camera.enqueue(move || tx.send(42).unwrap()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 42);

    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
}

#[test]
fn test_concurrent_owners_never_share_two_threads() {
    const OWNERS: usize = 8;
    const ROUNDS: usize = 200;

    let (camera, threads) = observed();
    let executed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(OWNERS));

    let handles: Vec<_> = (0..OWNERS)
        .map(|_| {
            let camera = camera.clone();
            let executed = Arc::clone(&executed);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let e = Arc::clone(&executed);
                    camera
                        .acquire_and_enqueue(move || {
                            e.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();

                    // While we hold a reference there must be a live thread
                    assert_eq!(camera.status().state, StateKind::Running);

                    let e = Arc::clone(&executed);
                    camera
                        .enqueue(move || {
                            e.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    camera.release().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(executed.load(Ordering::SeqCst), OWNERS * ROUNDS * 2);
    assert_eq!(threads.peak.load(Ordering::SeqCst), 1);
    assert_eq!(threads.live.load(Ordering::SeqCst), 0);
    assert_eq!(
        threads.started.load(Ordering::SeqCst) as u64,
        camera.status().contexts_started
    );
}

#[test]
fn test_release_and_acquire_race_at_zero() {
    const ITERATIONS: usize = 300;

    let (camera, threads) = observed();
    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..ITERATIONS {
        camera.acquire_and_enqueue(|| {}).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        // One thread drops the count to zero while the other brings it back
        let releaser = {
            let camera = camera.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                camera.release().unwrap();
            })
        };
        let acquirer = {
            let camera = camera.clone();
            let barrier = Arc::clone(&barrier);
            let executed = Arc::clone(&executed);
            thread::spawn(move || {
                barrier.wait();
                camera
                    .acquire_and_enqueue(move || {
                        executed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                assert_eq!(camera.status().state, StateKind::Running);
                camera.release().unwrap();
            })
        };

        releaser.join().unwrap();
        acquirer.join().unwrap();
    }

    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(executed.load(Ordering::SeqCst), ITERATIONS);
    assert_eq!(threads.peak.load(Ordering::SeqCst), 1);
    assert_eq!(
        threads.started.load(Ordering::SeqCst),
        threads.stopped.load(Ordering::SeqCst)
    );
}

#[test]
fn test_task_can_release_from_camera_thread() {
    let camera = CameraThread::new(Config::default());
    let inner = camera.clone();

    // Closing the device on the camera thread, then dropping the reference
    camera
        .acquire_and_enqueue(move || inner.release().unwrap())
        .unwrap();

    assert!(camera.wait_until_idle(WAIT));
    assert_eq!(camera.status().owners, 0);
}

#[test]
fn test_global_is_shared() {
    let a = CameraThread::global();
    let b = CameraThread::global();
    assert!(std::ptr::eq(a, b));
}

/// Panics the first time it sees the given hook
struct FaultyObserver {
    fail_start: AtomicBool,
    fail_close: AtomicBool,
}

impl FaultyObserver {
    fn new(fail_start: bool, fail_close: bool) -> Arc<Self> {
        Arc::new(Self {
            fail_start: AtomicBool::new(fail_start),
            fail_close: AtomicBool::new(fail_close),
        })
    }
}

impl LifecycleObserver for FaultyObserver {
    fn on_transition(&self, from: StateKind, to: StateKind) {
        if from == StateKind::Stopping
            && to == StateKind::Idle
            && self.fail_close.swap(false, Ordering::SeqCst)
        {
            panic!("observer failed on close");
        }
    }

    fn on_context_started(&self, _id: ContextId) {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            panic!("camera refused to open");
        }
    }
}

#[test]
fn test_observer_panic_during_teardown_does_not_wedge() {
    let camera = CameraThread::with_observer(Config::default(), FaultyObserver::new(false, true));

    camera.acquire_and_enqueue(|| {}).unwrap();
    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
    let status = camera.status();
    assert_eq!(status.state, StateKind::Idle);
    assert_eq!(status.context, None);

    let (tx, rx) = mpsc::channel();
    camera.acquire_and_enqueue(move || tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(camera.status().contexts_started, 2);
    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
}

#[test]
fn test_thread_dying_during_startup_is_recoverable() {
    let camera = CameraThread::with_observer(Config::default(), FaultyObserver::new(true, false));

    let err = camera.acquire_and_enqueue(|| {}).unwrap_err();
    assert!(err.is_resource_unavailable());
    let status = camera.status();
    assert_eq!(status.owners, 0);
    assert_eq!(status.state, StateKind::Idle);
    assert_eq!(status.context, None);
    assert!(camera.wait_until_idle(WAIT));

    let (tx, rx) = mpsc::channel();
    camera.acquire_and_enqueue(move || tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert_eq!(camera.status().owners, 1);
    camera.release().unwrap();
    assert!(camera.wait_until_idle(WAIT));
}
