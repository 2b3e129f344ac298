use std::cell::Cell;
use std::time::Duration;

thread_local! {
    static EXECUTION_TIME_NS: Cell<u64> = const { Cell::new(0) };
}

pub fn reset_execution_time() {
    EXECUTION_TIME_NS.with(|cell| cell.set(0));
}

pub fn add_execution_time(duration: Duration) {
    let nanos = duration.as_nanos();
    let nanos = nanos.min(u128::from(u64::MAX)) as u64;
    EXECUTION_TIME_NS.with(|cell| {
        let current = cell.get();
        let next = current.saturating_add(nanos);
        cell.set(next);
    });
}

/// Returns the task-loop time accumulated on this thread since the last take, and resets it.
pub fn take_execution_time() -> Duration {
    EXECUTION_TIME_NS.with(|cell| {
        let nanos = cell.get();
        cell.set(0);
        Duration::from_nanos(nanos)
    })
}
