use dispatch_queue::{DispatchTask, PanicPolicy, QueueConfig, TaskDispatchThread};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn flag_task(flag: &Arc<AtomicBool>) -> impl FnOnce() + Send + use<> {
    let flag = flag.clone();
    move || flag.store(true, Ordering::SeqCst)
}

#[test]
fn test_tasks_submitted_after_quit_never_run() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-after-quit")?;
    queue.quit();
    assert!(!queue.is_running());

    let immediate = Arc::new(AtomicBool::new(false));
    let delayed = Arc::new(AtomicBool::new(false));
    queue.run_async(flag_task(&immediate));
    queue.run_async_after(flag_task(&delayed), Duration::from_millis(5));

    // Rejected at submission: nothing was queued for a worker to pick up.
    assert!(!immediate.load(Ordering::SeqCst));
    assert!(!delayed.load(Ordering::SeqCst));
    assert_eq!(queue.pending(), 0);
    Ok(())
}

#[test]
fn test_run_sync_after_quit_reports_drop() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-sync")?;
    queue.quit();

    let ran = Arc::new(AtomicBool::new(false));
    assert!(!queue.run_sync(flag_task(&ran)));
    assert!(!ran.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_delayed_task_pending_at_quit_is_abandoned() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-delayed")?;

    let ran = Arc::new(AtomicBool::new(false));
    queue.run_async_after(flag_task(&ran), Duration::from_millis(50));
    // Returns once the worker has exited, so the task can no longer run.
    queue.quit();

    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(queue.pending(), 0);
    Ok(())
}

#[test]
fn test_due_tasks_still_run_during_quit() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-due")?;

    let ran = Arc::new(AtomicBool::new(false));
    queue.run_async(|| thread::sleep(Duration::from_millis(30)));
    queue.run_async(flag_task(&ran));

    // Joins the worker, which first finishes everything already due.
    queue.quit();
    assert!(ran.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_quit_is_idempotent() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-twice")?;
    queue.quit();
    queue.quit();
    assert!(!queue.is_running());
    Ok(())
}

#[test]
fn test_quit_from_worker_detaches() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-self")?;
    let handle = queue.handle();

    // Joining would deadlock here; the worker detaches itself instead.
    assert!(queue.run_sync(move || handle.quit()));
    assert!(!queue.is_running());

    let ran = Arc::new(AtomicBool::new(false));
    queue.run_async(flag_task(&ran));
    queue.quit();
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(queue.pending(), 0);
    Ok(())
}

#[test]
fn test_panicking_task_is_caught_and_logged() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-catch")?;

    assert!(!queue.run_sync(DispatchTask::new(|| panic!("task failure"))));
    assert!(queue.is_running());

    let ran = Arc::new(AtomicBool::new(false));
    assert!(queue.run_sync(flag_task(&ran)));
    assert!(ran.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_propagate_policy_stops_queue() -> anyhow::Result<()> {
    init_tracing();
    let config = QueueConfig::new("shutdown-propagate").with_panic_policy(PanicPolicy::Propagate);
    let queue = TaskDispatchThread::with_config(config)?;

    let delayed = Arc::new(AtomicBool::new(false));
    queue.run_async_after(flag_task(&delayed), Duration::from_millis(200));

    assert!(!queue.run_sync(DispatchTask::new(|| panic!("fatal task"))));

    // Joins the dead worker.
    queue.quit();
    assert!(!queue.is_running());
    assert_eq!(queue.pending(), 0);
    assert!(!delayed.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_drop_joins_worker() -> anyhow::Result<()> {
    init_tracing();
    let ran = Arc::new(AtomicBool::new(false));
    {
        let queue = TaskDispatchThread::new("shutdown-drop")?;
        queue.run_async(|| thread::sleep(Duration::from_millis(20)));
        queue.run_async(flag_task(&ran));
    }
    assert!(ran.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_concurrent_quit_waits_for_worker() -> anyhow::Result<()> {
    init_tracing();
    let queue = TaskDispatchThread::new("shutdown-concurrent")?;
    let finished = Arc::new(AtomicBool::new(false));

    let (started_tx, started) = std::sync::mpsc::channel::<()>();
    {
        let finished = finished.clone();
        queue.run_async(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(300));
            finished.store(true, Ordering::SeqCst);
        });
    }
    started.recv()?;

    thread::scope(|scope| {
        let first = scope.spawn(|| queue.quit());
        thread::sleep(Duration::from_millis(20));

        // Whichever call gets the worker handle, both return only after the
        // running task is done.
        queue.quit();
        assert!(finished.load(Ordering::SeqCst));

        let _ = first.join();
    });
    assert!(finished.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn test_drop_after_worker_side_quit_waits_for_worker() -> anyhow::Result<()> {
    init_tracing();
    let finished = Arc::new(AtomicBool::new(false));
    {
        let queue = TaskDispatchThread::new("shutdown-self-then-drop")?;
        let handle = queue.handle();
        let flag = finished.clone();
        queue.run_async(move || {
            handle.quit();
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        });
        // Let the task reach its own quit before the queue is dropped.
        thread::sleep(Duration::from_millis(10));
    }
    assert!(finished.load(Ordering::SeqCst));
    Ok(())
}
