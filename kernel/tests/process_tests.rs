//! Bare-metal integration tests for TPR's process lifecycle: spec §8
//! scenario S2 (fork shares pages CoW, a write in either side is private to
//! it) plus exit/reap end to end, which needs a real address space and a
//! real `#PF`-driven CoW fault, not just the host-testable bookkeeping
//! already covered in `process::exit`/`process::lifecycle`.

#![no_std]
#![no_main]

extern crate alloc;

#[path = "common/mod.rs"]
mod common;

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use raeen_kernel::error::KernelError;
use raeen_kernel::mm::demand_paging;
use raeen_kernel::mm::page_table;
use raeen_kernel::mm::vas::{MappingKind, Protection, Sharing, PAGE_SIZE};
use raeen_kernel::process::{self, creation, exit, fork, lifecycle, table};
use raeen_kernel::sched::task::Priority;
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
        &(fork_child_sees_parents_data_until_either_side_writes as fn() -> Result<(), KernelError>),
        &(a_write_after_fork_never_changes_the_other_sides_page as fn() -> Result<(), KernelError>),
        &(exit_then_reap_yields_the_exact_exit_code as fn() -> Result<(), KernelError>),
    ];
    test_runner(TESTS)
}

extern "C" fn noop_entry(_arg: usize) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

fn poke(pid: u64, addr: u64, byte: u8) -> Result<(), KernelError> {
    demand_paging::resolve_fault(pid, addr, true)?;
    let phys = process::with_address_space(pid, |a| a.mapper().translate(addr))
        .flatten()
        .ok_or(KernelError::Fault { addr })?;
    // SAFETY: `resolve_fault` just installed a present, writable mapping.
    unsafe { *page_table::phys_to_virt_ptr(phys) = byte };
    Ok(())
}

fn peek(pid: u64, addr: u64) -> Result<u8, KernelError> {
    demand_paging::resolve_fault(pid, addr, false)?;
    let phys = process::with_address_space(pid, |a| a.mapper().translate(addr))
        .flatten()
        .ok_or(KernelError::Fault { addr })?;
    // SAFETY: just resolved present via `resolve_fault`.
    Ok(unsafe { *page_table::phys_to_virt_ptr(phys) })
}

fn fork_child_sees_parents_data_until_either_side_writes() -> Result<(), KernelError> {
    let parent = creation::process_create("fork-parent", Priority::Normal, 0, 0, None)?;
    creation::thread_create(parent, noop_entry, 0, raeen_kernel::process::thread::KERNEL_STACK_SIZE)?;
    let addr = process::with_address_space(parent, |a| {
        a.map(None, PAGE_SIZE, Protection::RW, Sharing::Private, MappingKind::Anonymous)
    })
    .ok_or(KernelError::NoSuchProcess { pid: parent })??;
    poke(parent, addr, 7)?;

    let child = fork::fork(parent)?;
    if peek(child, addr)? != 7 {
        return Err(KernelError::Fault { addr });
    }
    Ok(())
}

fn a_write_after_fork_never_changes_the_other_sides_page() -> Result<(), KernelError> {
    let parent = creation::process_create("fork-parent-2", Priority::Normal, 0, 0, None)?;
    creation::thread_create(parent, noop_entry, 0, raeen_kernel::process::thread::KERNEL_STACK_SIZE)?;
    let addr = process::with_address_space(parent, |a| {
        a.map(None, PAGE_SIZE, Protection::RW, Sharing::Private, MappingKind::Anonymous)
    })
    .ok_or(KernelError::NoSuchProcess { pid: parent })??;
    poke(parent, addr, 1)?;

    let child = fork::fork(parent)?;
    poke(child, addr, 99)?;

    if peek(parent, addr)? != 1 {
        return Err(KernelError::Fault { addr });
    }
    if peek(child, addr)? != 99 {
        return Err(KernelError::Fault { addr });
    }
    Ok(())
}

fn exit_then_reap_yields_the_exact_exit_code() -> Result<(), KernelError> {
    let parent = creation::process_create("reap-parent", Priority::Normal, 0, 0, None)?;
    let child = creation::process_create("reap-child", Priority::Normal, 0, 0, Some(parent))?;
    creation::thread_create(child, noop_entry, 0, raeen_kernel::process::thread::KERNEL_STACK_SIZE)?;

    exit::exit_process(child, 17);
    let code = lifecycle::reap(parent, child)?;
    if code != 17 {
        return Err(KernelError::Inval);
    }
    if lifecycle::find(child) {
        return Err(KernelError::Busy);
    }
    let _ = table::require_process(parent);
    Ok(())
}
