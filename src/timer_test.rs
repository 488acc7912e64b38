use std::sync::atomic::AtomicUsize;

use super::*;

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let make = move || {
        let seen = Arc::clone(&seen);
        Box::pin(async move {
            seen.fetch_add(1, Ordering::SeqCst);
        }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
    };
    (count, make)
}

async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn fires_after_delay() {
    let slot = TimerSlot::new();
    let (count, task) = counter();

    slot.schedule(Duration::from_millis(100), task());
    tokio::time::sleep(Duration::from_millis(99)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(slot.is_waiting());

    tokio::time::sleep(Duration::from_millis(2)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!slot.is_waiting());
}

#[tokio::test(start_paused = true)]
async fn rescheduling_replaces_pending_timer() {
    let slot = TimerSlot::new();
    let (count, task) = counter();

    slot.schedule(Duration::from_millis(100), task());
    slot.schedule(Duration::from_millis(300), task());
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn schedule_if_idle_keeps_waiting_timer() {
    let slot = TimerSlot::new();
    let (count, task) = counter();

    assert!(slot.schedule_if_idle(Duration::from_millis(100), task()));
    assert!(!slot.schedule_if_idle(Duration::from_millis(10), task()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(slot.schedule_if_idle(Duration::from_millis(10), task()));
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_firing() {
    let slot = TimerSlot::new();
    let (count, task) = counter();

    slot.schedule(Duration::from_millis(100), task());
    assert!(slot.cancel());
    assert!(!slot.cancel());

    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_running_callback() {
    let slot = TimerSlot::new();
    let reached_end = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&reached_end);

    slot.schedule(Duration::from_millis(10), async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        flag.fetch_add(1, Ordering::SeqCst);
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    slot.cancel();

    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(reached_end.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn drop_cancels() {
    let (count, task) = counter();
    {
        let slot = TimerSlot::new();
        slot.schedule(Duration::from_millis(100), task());
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    settle().await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
