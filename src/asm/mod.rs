//! Appropriate assembly language routines for the architecture
//!
//! Each backend supplies a [`Context`] holding the callee-saved register
//! file plus the stack pointer, and a `switch` routine that parks the
//! current execution in one context and resumes another. Everything else
//! in the crate is architecture-neutral.

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "x86_64")]
pub(crate) use x86_64::{Context, switch};

#[cfg(target_arch = "aarch64")]
mod aarch64;

#[cfg(target_arch = "aarch64")]
pub(crate) use aarch64::{Context, switch};

#[cfg(target_arch = "riscv64")]
mod riscv64;

#[cfg(target_arch = "riscv64")]
pub(crate) use riscv64::{Context, switch};

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
)))]
compile_error!("no context-switch backend for this target architecture");

// End of File
