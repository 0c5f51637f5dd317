//! x86-64 System V context switching

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::arch::naked_asm;
use core::mem::offset_of;

/// The register state we must preserve across a cooperative switch.
///
/// Only the stack pointer and the System V callee-saved registers are
/// needed: a switch is an ordinary function call, so the caller-saved
/// half of the register file is already dead at the call site.
#[repr(C)]
pub(crate) struct Context {
    rsp: u64,
    rbp: u64,
    rbx: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
}

impl Context {
    /// An empty context; must be filled by `fresh` or by `switch` before
    /// it is ever resumed
    pub(crate) const fn new() -> Context {
        Context {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }

    /// Build a context that enters `entry` on the stack ending at
    /// `stack_top`.
    ///
    /// The return address popped by `switch`'s final `ret` is planted on
    /// the new stack, positioned so that `entry` begins with the stack
    /// misaligned by 8 exactly as if it had been `call`ed.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the one-past-the-end pointer of a live
    /// allocation with at least 32 bytes of space below it.
    pub(crate) unsafe fn fresh(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Context {
        let mut sp = (stack_top as usize) & !15;
        sp -= 16;
        // SAFETY: caller promised room below `stack_top`
        unsafe { (sp as *mut usize).write(entry as usize) };
        let mut ctx = Context::new();
        ctx.rsp = sp as u64;
        // A zero frame pointer terminates backtraces in the new task
        ctx.rbp = 0;
        ctx
    }
}

/// Park the current execution in `save` and resume the one in `restore`.
///
/// Returns when something later resumes `save`. It is a naked function
/// so the compiler cannot spill anything after we have started moving
/// the stack pointer.
///
/// # Safety
///
/// `save` must be writable. `restore` must hold a context made by
/// [`Context::fresh`] or by a previous pass through this function, whose
/// stack is live and not in use by any other execution.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(_save: *mut Context, _restore: *const Context) {
    naked_asm!(
        r#"
        // rdi = save, rsi = restore

        // Park the caller: stack pointer first, then the callee-saved set
        mov     [rdi + {rsp}], rsp
        mov     [rdi + {rbp}], rbp
        mov     [rdi + {rbx}], rbx
        mov     [rdi + {r12}], r12
        mov     [rdi + {r13}], r13
        mov     [rdi + {r14}], r14
        mov     [rdi + {r15}], r15

        // Adopt the resumed execution's registers and stack
        mov     rsp, [rsi + {rsp}]
        mov     rbp, [rsi + {rbp}]
        mov     rbx, [rsi + {rbx}]
        mov     r12, [rsi + {r12}]
        mov     r13, [rsi + {r13}]
        mov     r14, [rsi + {r14}]
        mov     r15, [rsi + {r15}]

        // Pop the resumed execution's return address and continue there
        ret
        "#,
        rsp = const offset_of!(Context, rsp),
        rbp = const offset_of!(Context, rbp),
        rbx = const offset_of!(Context, rbx),
        r12 = const offset_of!(Context, r12),
        r13 = const offset_of!(Context, r13),
        r14 = const offset_of!(Context, r14),
        r15 = const offset_of!(Context, r15),
    );
}

// End of File
