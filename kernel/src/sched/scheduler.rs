//! Dispatch, the timer tick, and the context switch driver, spec §4.7.
//!
//! The five ready queues, the wait-queue registry, and the sleep queue are
//! each guarded by their own lock, per spec §5's per-resource discipline.
//! No lock here is ever held across a call into [`crate::arch::x86_64::context::switch`]
//! (a suspension point) or across [`crate::mm::demand_paging::copy_in`]/
//! `copy_out`, per the same section's "holding any lock across copy_in/
//! copy_out is forbidden."

extern crate alloc;

use super::queue::{ReadyQueues, SleepQueue, WaitQueues};
use super::task::Priority;
use crate::arch::x86_64::context::{self, TaskContext};
use crate::mm::page_table;
use crate::process::thread::ThreadState;
use crate::process::{self, table};
use crate::sync::without_interrupts;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

static READY: Mutex<ReadyQueues> = Mutex::new(ReadyQueues::new());
static WAITS: Mutex<WaitQueues> = Mutex::new(WaitQueues::new());
static SLEEPS: Mutex<SleepQueue> = Mutex::new(SleepQueue::new());

/// `0` means "no idle thread yet" (true only before [`init`] runs).
static IDLE_TID: AtomicU64 = AtomicU64::new(0);
static NEXT_WAIT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh wait-queue id for a caller that has no natural
/// resource id of its own to block on (e.g. a condition variable rather
/// than "the wait queue for pid 7's children").
pub fn new_wait_queue_id() -> u64 {
    NEXT_WAIT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Result of [`block_on_with_deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Woken,
    TimedOut,
}

/// Creates the idle thread (always Ready, dispatched when every band is
/// empty) under the kernel process. Must run once, after `process::init`,
/// before [`start`].
pub fn init() -> u64 {
    let tid = crate::process::creation::thread_create(
        process::KERNEL_PID,
        idle_entry,
        0,
        crate::process::thread::KERNEL_STACK_SIZE,
    )
    .expect("failed to create idle thread");
    IDLE_TID.store(tid, Ordering::Release);
    crate::println!("[SCHED] idle thread created, tid={}", tid);
    tid
}

extern "C" fn idle_entry(_arg: usize) -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Parks the boot flow onto the idle thread's own kernel stack and never
/// returns. Every subsequent dispatch happens through [`reschedule`]
/// switching *away from* some real thread's context, so only this first
/// jump needs a throwaway "previous" context to save into.
pub fn start() -> ! {
    let idle_tid = IDLE_TID.load(Ordering::Acquire);
    without_interrupts(|| {
        READY.lock().remove(idle_tid);
    });
    table::with_thread_mut(idle_tid, |t| {
        t.state = ThreadState::Running;
        t.reload_time_slice();
    });
    process::set_current_tid(idle_tid);

    static mut BOOT_CONTEXT: TaskContext = TaskContext::empty();
    // SAFETY: idle_tid was just created by `init` and is reachable in the
    // thread table; this is the only code that ever reads its context
    // pointer before the thread has been switched into.
    let next_ctx: *const TaskContext =
        unsafe { table::thread_ptr(idle_tid) }.map(|p| unsafe { core::ptr::addr_of!((*p).context) }).expect("idle thread vanished");

    crate::println!("[SCHED] dispatching idle thread (tid={})", idle_tid);
    // SAFETY: BOOT_CONTEXT is never read again (nothing ever switches back
    // into the boot flow), and next_ctx points at a context built by
    // `TaskContext::new`, satisfying `switch`'s contract.
    unsafe {
        context::switch(core::ptr::addr_of_mut!(BOOT_CONTEXT), next_ctx);
    }
    unreachable!("control never returns to the boot context");
}

/// `add(T)`: enqueues an already-created thread Ready at its priority,
/// preempting the current thread if its band is lower.
pub fn add(tid: u64) {
    let Some(pri) = table::with_thread(tid, |t| t.priority) else {
        return;
    };
    table::with_thread_mut(tid, |t| t.state = ThreadState::Ready);
    without_interrupts(|| READY.lock().push_back(pri, tid));
    preempt_if_higher(pri);
}

/// `remove(T)`: pulls `tid` out of whichever queue (ready, wait, sleep) it
/// currently sits in, without touching its state. Used by thread teardown.
pub fn remove(tid: u64) -> bool {
    let from_ready = without_interrupts(|| READY.lock().remove(tid));
    let from_wait = without_interrupts(|| WAITS.lock().remove(tid)).is_some();
    let from_sleep = without_interrupts(|| SLEEPS.lock().remove(tid));
    from_ready || from_wait || from_sleep
}

/// `yield()`: voluntarily gives up the CPU, rejoining the tail of the
/// current thread's own priority band.
pub fn yield_now() {
    let Some(cur) = process::current_tid() else {
        return;
    };
    let pri = table::with_thread(cur, |t| t.priority).unwrap_or(Priority::Idle);
    table::with_thread_mut(cur, |t| t.state = ThreadState::Ready);
    without_interrupts(|| READY.lock().push_back(pri, cur));
    reschedule();
}

/// `block_on(wait_queue)`: suspends the current thread on a named wait
/// queue with no deadline.
pub fn block_on(wait_queue: u64) {
    let Some(cur) = process::current_tid() else {
        return;
    };
    table::with_thread_mut(cur, |t| {
        t.state = ThreadState::Blocked;
        t.wait_queue = Some(wait_queue);
    });
    without_interrupts(|| WAITS.lock().block(wait_queue, cur));
    reschedule();
    table::with_thread_mut(cur, |t| t.wait_queue = None);
}

/// `block_on(wait_queue)` with a deadline: spec §5's "blocked threads
/// carry an optional deadline; the tick handler wakes them with a
/// `TimedOut` result." [`tick`] races [`wake`]/[`wake_all`] to decide
/// which of the two actually resumes this thread.
pub fn block_on_with_deadline(wait_queue: u64, deadline_ms: u64) -> WaitResult {
    let Some(cur) = process::current_tid() else {
        return WaitResult::Woken;
    };
    table::with_thread_mut(cur, |t| {
        t.state = ThreadState::Blocked;
        t.wait_queue = Some(wait_queue);
        t.wake_deadline = Some(deadline_ms);
    });
    without_interrupts(|| {
        WAITS.lock().block(wait_queue, cur);
        SLEEPS.lock().insert(deadline_ms, cur);
    });
    reschedule();

    // `wake`/`wake_all` clear `wait_queue` on a genuine wakeup; `tick`'s
    // expiry path deliberately leaves it set so this check can tell the
    // two apart.
    let timed_out = table::with_thread(cur, |t| t.wait_queue.is_some()).unwrap_or(false);
    table::with_thread_mut(cur, |t| {
        t.wait_queue = None;
        t.wake_deadline = None;
    });
    if timed_out {
        without_interrupts(|| {
            WAITS.lock().remove(cur);
        });
        WaitResult::TimedOut
    } else {
        WaitResult::Woken
    }
}

/// `sleep(ms)`: suspends the current thread until `ms` milliseconds have
/// elapsed.
pub fn sleep(ms: u32) {
    let Some(cur) = process::current_tid() else {
        return;
    };
    let deadline = crate::timer::now_ms() + ms as u64;
    table::with_thread_mut(cur, |t| {
        t.state = ThreadState::Sleeping;
        t.wake_deadline = Some(deadline);
    });
    without_interrupts(|| SLEEPS.lock().insert(deadline, cur));
    reschedule();
}

/// `wake(T)`: moves a specific thread off whichever queue it is on back to
/// the tail of its priority's ready queue, preempting the current thread
/// if the waker's band is higher.
pub fn wake(tid: u64) -> bool {
    let Some(pri) = table::with_thread(tid, |t| t.priority) else {
        return false;
    };
    without_interrupts(|| {
        WAITS.lock().remove(tid);
        SLEEPS.lock().remove(tid);
    });
    table::with_thread_mut(tid, |t| {
        t.state = ThreadState::Ready;
        t.wait_queue = None;
        t.wake_deadline = None;
    });
    without_interrupts(|| READY.lock().push_back(pri, tid));
    preempt_if_higher(pri);
    true
}

/// `wake_all(wait_queue)`: wakes every thread currently on `wait_queue`, in
/// FIFO order.
pub fn wake_all(wait_queue: u64) -> usize {
    let tids = without_interrupts(|| WAITS.lock().wake_all(wait_queue));
    let count = tids.len();
    for tid in tids {
        wake(tid);
    }
    count
}

/// Marks `tid` cancelled: removed from whichever queue it sits on and
/// transitioned straight to Zombie. Cancelling the current thread
/// deschedules it immediately; there is no cooperative protocol (spec
/// §4.7's "Cancellation").
pub fn cancel(tid: u64) {
    remove(tid);
    table::with_thread_mut(tid, |t| t.state = ThreadState::Zombie);
    if process::current_tid() == Some(tid) {
        reschedule();
    }
}

/// The highest-priority band with a Ready thread, or the idle thread if
/// every band is empty.
fn pick_next() -> u64 {
    let mut ready = READY.lock();
    if let Some(band) = ready.highest_nonempty() {
        if let Some(tid) = ready.pop_front(band) {
            return tid;
        }
    }
    IDLE_TID.load(Ordering::Acquire)
}

/// Requeues the current thread at the tail of its own band (without
/// reloading its state past Ready — whatever transition the caller made
/// already stands) and dispatches whichever thread the ready queues now
/// name, which may be the same thread again.
fn preempt_if_higher(new_band: Priority) {
    without_interrupts(|| {
        let Some(cur) = process::current_tid() else {
            return;
        };
        let Some(cur_pri) = table::with_thread(cur, |t| t.priority) else {
            return;
        };
        if new_band < cur_pri {
            table::with_thread_mut(cur, |t| t.state = ThreadState::Ready);
            READY.lock().push_back(cur_pri, cur);
            reschedule();
        }
    });
}

/// Dispatches whichever thread [`pick_next`] names. Must be called with no
/// subsystem lock held (it switches the CPU's entire register file and
/// possibly its page-table root). The caller is responsible for having
/// already placed the outgoing thread wherever it belongs (a ready queue,
/// a wait queue, the sleep queue, or nowhere, if it has become Zombie).
pub fn reschedule() {
    without_interrupts(|| {
        let next_tid = pick_next();
        let prev_tid = process::current_tid();

        table::with_thread_mut(next_tid, |t| {
            t.state = ThreadState::Running;
            t.reload_time_slice();
        });
        process::set_current_tid(next_tid);

        if prev_tid == Some(next_tid) {
            return;
        }

        let next_pid = table::with_thread(next_tid, |t| t.pid).expect("next thread vanished");
        if let Some(next_root) = process::with_address_space(next_pid, |a| a.root_frame()) {
            if next_root != page_table::current_root() {
                // SAFETY: `next_root` is the root of `next_pid`'s live
                // address space, whose kernel half matches every other
                // address space's by construction.
                unsafe { page_table::load_root(next_root) };
            }
        }

        // SAFETY: both tids name threads currently reachable in the table;
        // `next_ctx` was built either by `TaskContext::new` or by a prior
        // `switch` out of `next_tid`, satisfying `switch`'s contract.
        unsafe {
            let next_ctx: *const TaskContext = table::thread_ptr(next_tid)
                .map(|p| core::ptr::addr_of!((*p).context))
                .expect("next thread vanished");
            match prev_tid {
                Some(prev) => {
                    let prev_ctx: *mut TaskContext = table::thread_ptr(prev)
                        .map(|p| core::ptr::addr_of_mut!((*p).context))
                        .expect("prev thread vanished");
                    (*prev).stats.context_switches.fetch_add(1, Ordering::Relaxed);
                    context::switch(prev_ctx, next_ctx);
                }
                None => {
                    static mut FALLBACK: TaskContext = TaskContext::empty();
                    context::switch(core::ptr::addr_of_mut!(FALLBACK), next_ctx);
                }
            }
        }
    });
}

/// `tick()`: called once per millisecond from the timer interrupt. Wakes
/// any thread whose sleep/timeout deadline has elapsed, decrements the
/// running thread's time slice, and reschedules when the slice is spent
/// or a higher-priority thread just became Ready.
pub fn tick() {
    let now = crate::timer::on_tick();

    let due = without_interrupts(|| SLEEPS.lock().drain_due(now));
    let mut woke_band = None;
    for tid in due {
        expire(tid);
        if let Some(pri) = table::with_thread(tid, |t| t.priority) {
            woke_band = Some(woke_band.map_or(pri, |b: Priority| b.min(pri)));
        }
    }

    let slice_spent = process::current_tid()
        .map(|cur| {
            table::with_thread_mut(cur, |t| {
                t.time_slice_remaining = t.time_slice_remaining.saturating_sub(1);
                t.time_slice_remaining == 0
            })
            .unwrap_or(false)
        })
        .unwrap_or(false);

    let preempted = woke_band
        .zip(process::current_tid().and_then(|cur| table::with_thread(cur, |t| t.priority)))
        .map(|(woke, cur_pri)| woke < cur_pri)
        .unwrap_or(false);

    if slice_spent || preempted {
        if let Some(cur) = process::current_tid() {
            let pri = table::with_thread(cur, |t| t.priority).unwrap_or(Priority::Idle);
            table::with_thread_mut(cur, |t| t.state = ThreadState::Ready);
            without_interrupts(|| READY.lock().push_back(pri, cur));
        }
        reschedule();
    }
}

/// A sleep/timeout deadline elapsed for `tid`. Distinguishes an ordinary
/// `sleep(ms)` expiry (thread was Sleeping) from a timed-out `block_on`
/// (thread was Blocked): the latter is left with `wait_queue` still set so
/// [`block_on_with_deadline`] can report `TimedOut` once it resumes.
fn expire(tid: u64) {
    let was_blocked = table::with_thread(tid, |t| t.state == ThreadState::Blocked).unwrap_or(false);
    if was_blocked {
        without_interrupts(|| {
            WAITS.lock().remove(tid);
        });
        table::with_thread_mut(tid, |t| t.state = ThreadState::Ready);
    } else {
        table::with_thread_mut(tid, |t| {
            t.state = ThreadState::Ready;
            t.wake_deadline = None;
        });
    }
    let pri = table::with_thread(tid, |t| t.priority).unwrap_or(Priority::Idle);
    without_interrupts(|| READY.lock().push_back(pri, tid));
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn wait_queue_ids_are_unique() {
        let a = new_wait_queue_id();
        let b = new_wait_queue_id();
        assert_ne!(a, b);
    }
}
