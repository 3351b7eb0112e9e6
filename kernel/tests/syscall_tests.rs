//! Bare-metal integration tests for the syscall dispatcher: spec §8 scenario
//! S5 (a bad user pointer is rejected rather than trusted) plus basic
//! dispatch/permission/stats coverage that needs a real "current thread" and
//! a real address space behind `copy_in` — the host unit tests in
//! `syscall::*` only dispatch from no process context at all.

#![no_std]
#![no_main]

extern crate alloc;

#[path = "common/mod.rs"]
mod common;

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicIsize, Ordering};
use raeen_kernel::error::KernelError;
use raeen_kernel::mm::vas::{MappingKind, Protection, Sharing, PAGE_SIZE};
use raeen_kernel::process::{self, creation};
use raeen_kernel::sched::scheduler;
use raeen_kernel::sched::task::Priority;
use raeen_kernel::syscall;
use raeen_kernel::test_framework::{test_runner, Testable};

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
    raeen_kernel::sched::scheduler::start();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    raeen_kernel::test_framework::test_panic_handler(info)
}

extern "C" fn test_thread_entry(_arg: usize) -> ! {
    static TESTS: &[&dyn Testable] = &[
        &(getpid_reports_the_calling_threads_process as fn() -> Result<(), KernelError>),
        &(write_to_an_unmapped_buffer_is_rejected_not_trusted as fn() -> Result<(), KernelError>),
        &(write_through_a_valid_buffer_succeeds as fn() -> Result<(), KernelError>),
        &(set_priority_is_rejected_for_a_non_root_caller as fn() -> Result<(), KernelError>),
        &(an_unknown_syscall_number_is_rejected as fn() -> Result<(), KernelError>),
        &(dispatching_a_call_accumulates_its_stats as fn() -> Result<(), KernelError>),
    ];
    test_runner(TESTS)
}

fn getpid_reports_the_calling_threads_process() -> Result<(), KernelError> {
    let result = syscall::dispatch(39, 0, 0, 0, 0, 0, 0);
    if result == process::KERNEL_PID as isize {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

/// S5: a pointer into unmapped address space must make `write` fail, never
/// get dereferenced on the dispatcher's behalf.
fn write_to_an_unmapped_buffer_is_rejected_not_trusted() -> Result<(), KernelError> {
    let result = syscall::dispatch(1, 1, 0x4000_0000, 8, 0, 0, 0);
    if result < 0 {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

fn write_through_a_valid_buffer_succeeds() -> Result<(), KernelError> {
    let pid = process::current_pid().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    let addr = process::with_address_space(pid, |a| {
        a.map(None, PAGE_SIZE, Protection::RW, Sharing::Private, MappingKind::Anonymous)
    })
    .ok_or(KernelError::NoSuchProcess { pid })??;

    let msg = b"ok\n";
    raeen_kernel::mm::demand_paging::copy_out(addr, msg)?;

    let result = syscall::dispatch(1, 1, addr, msg.len() as u64, 0, 0, 0);
    if result == msg.len() as isize {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

static SET_PRIORITY_RESULT: AtomicIsize = AtomicIsize::new(0);
static SET_PRIORITY_DONE: AtomicIsize = AtomicIsize::new(0);

extern "C" fn non_root_set_priority_entry(target_pid: usize) -> ! {
    let result = syscall::dispatch(1001, target_pid as u64, 1, 0, 0, 0, 0);
    SET_PRIORITY_RESULT.store(result as isize, Ordering::Release);
    SET_PRIORITY_DONE.store(1, Ordering::Release);
    loop {
        scheduler::yield_now();
    }
}

/// The permission check in spec §4.8 step 2 looks at the *caller's*
/// process, not the target's — so this has to dispatch from a thread that
/// actually belongs to a non-root process, not just name a non-root target
/// while calling from this test thread's own (root) kernel process.
fn set_priority_is_rejected_for_a_non_root_caller() -> Result<(), KernelError> {
    let target = creation::process_create("priority-target", Priority::Normal, 0, 0, None)?;
    let caller = creation::process_create("non-root-caller", Priority::Normal, 1000, 1000, None)?;
    SET_PRIORITY_DONE.store(0, Ordering::Release);
    creation::thread_create(
        caller,
        non_root_set_priority_entry,
        target as usize,
        raeen_kernel::process::thread::KERNEL_STACK_SIZE,
    )?;

    while SET_PRIORITY_DONE.load(Ordering::Acquire) == 0 {
        scheduler::yield_now();
    }

    if SET_PRIORITY_RESULT.load(Ordering::Acquire) == KernelError::Perm.to_errno() {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

fn an_unknown_syscall_number_is_rejected() -> Result<(), KernelError> {
    let result = syscall::dispatch(0xdead, 0, 0, 0, 0, 0, 0);
    if result < 0 {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}

fn dispatching_a_call_accumulates_its_stats() -> Result<(), KernelError> {
    let before = syscall::stats_for(39).map(|s| s.count).unwrap_or(0);
    syscall::dispatch(39, 0, 0, 0, 0, 0, 0);
    syscall::dispatch(39, 0, 0, 0, 0, 0, 0);
    let after = syscall::stats_for(39).map(|s| s.count).unwrap_or(0);
    if after >= before + 2 {
        Ok(())
    } else {
        Err(KernelError::Inval)
    }
}
