//! Architecture-specific bring-up and primitives.
//!
//! This kernel targets x86-64 only; there is exactly one implementation
//! module. It exists as a separate module (rather than inlining GDT/IDT
//! setup into `bootstrap`) so the rest of the kernel never names a
//! register or instruction directly — the context-switch interface in
//! particular is the one place spec §9 calls out as "unavoidable assembly,
//! isolated behind `switch(prev_ctx, next_ctx)`".

pub mod x86_64;

pub use self::x86_64 as target;
