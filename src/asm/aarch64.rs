//! AArch64 (AAPCS64) context switching

// Copyright (c) 2025 Ferrous Systems
// SPDX-License-Identifier: GPL-3.0-or-later

use core::arch::naked_asm;

/// The register state we must preserve across a cooperative switch.
///
/// AAPCS64 makes x19-x28, the frame pointer, the link register and the
/// low halves of v8-v15 callee-saved; the link register doubles as the
/// resume address. Layout is fixed because the assembly below addresses
/// fields by offset.
#[repr(C)]
pub(crate) struct Context {
    sp: u64,
    /// x30; where the resumed execution continues
    lr: u64,
    x19_x28: [u64; 10],
    /// x29
    fp: u64,
    d8_d15: [u64; 8],
}

impl Context {
    /// A compile-time check that the layout matches the offsets the
    /// assembly below uses.
    const _CHECK: () = const {
        assert!(core::mem::offset_of!(Context, sp) == 0);
        assert!(core::mem::offset_of!(Context, lr) == 8);
        assert!(core::mem::offset_of!(Context, x19_x28) == 16);
        assert!(core::mem::offset_of!(Context, fp) == 96);
        assert!(core::mem::offset_of!(Context, d8_d15) == 104);
    };

    pub(crate) const fn new() -> Context {
        Context {
            sp: 0,
            lr: 0,
            x19_x28: [0; 10],
            fp: 0,
            d8_d15: [0; 8],
        }
    }

    /// Build a context that enters `entry` on the stack ending at
    /// `stack_top`.
    ///
    /// AAPCS64 demands a 16-byte aligned stack pointer at every point, so
    /// the entry simply starts at the aligned top with the link register
    /// carrying the entry address.
    ///
    /// # Safety
    ///
    /// `stack_top` must be the one-past-the-end pointer of a live
    /// allocation.
    pub(crate) unsafe fn fresh(stack_top: *mut u8, entry: extern "C" fn() -> !) -> Context {
        let mut ctx = Context::new();
        ctx.sp = (stack_top as u64) & !15;
        ctx.lr = entry as usize as u64;
        ctx.fp = 0;
        ctx
    }
}

/// Park the current execution in `save` and resume the one in `restore`.
///
/// # Safety
///
/// `save` must be writable. `restore` must hold a context made by
/// [`Context::fresh`] or by a previous pass through this function, whose
/// stack is live and not in use by any other execution.
#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch(_save: *mut Context, _restore: *const Context) {
    // Offsets match the field order of `Context` above:
    // 0 sp, 8 lr, 16..95 x19-x28, 96 x29, 104..167 d8-d15
    naked_asm!(
        r#"
        // x0 = save, x1 = restore
        mov     x9, sp
        stp     x9, x30, [x0]
        stp     x19, x20, [x0, 16]
        stp     x21, x22, [x0, 32]
        stp     x23, x24, [x0, 48]
        stp     x25, x26, [x0, 64]
        stp     x27, x28, [x0, 80]
        str     x29, [x0, 96]
        stp     d8, d9, [x0, 104]
        stp     d10, d11, [x0, 120]
        stp     d12, d13, [x0, 136]
        stp     d14, d15, [x0, 152]

        ldp     x9, x30, [x1]
        mov     sp, x9
        ldp     x19, x20, [x1, 16]
        ldp     x21, x22, [x1, 32]
        ldp     x23, x24, [x1, 48]
        ldp     x25, x26, [x1, 64]
        ldp     x27, x28, [x1, 80]
        ldr     x29, [x1, 96]
        ldp     d8, d9, [x1, 104]
        ldp     d10, d11, [x1, 120]
        ldp     d12, d13, [x1, 136]
        ldp     d14, d15, [x1, 152]

        ret
        "#,
    );
}

// End of File
