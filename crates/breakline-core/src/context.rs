//! Marshalling between a thread CONTEXT and the handler register map
//!
//! The marshaller only moves the sixteen GPRs. Rip and EFlags adjustments
//! (rewind past INT3, resume flag) are applied by the event loop after the
//! merge, never here.

use crate::threads::ThreadHandle;
use breakline_common::{Error, RegisterMap, Result};
use windows::Win32::System::Diagnostics::Debug::{
    GetThreadContext, SetThreadContext, CONTEXT, CONTEXT_FLAGS,
};

/// CONTEXT_ALL for AMD64: control, integer, segments, floating point and
/// debug registers.
pub(crate) const CONTEXT_ALL: CONTEXT_FLAGS = CONTEXT_FLAGS(0x0010_001F);

/// Capture the sixteen GPRs, plus the resume address, from a context.
pub fn context_to_map(ctx: &CONTEXT) -> RegisterMap {
    RegisterMap {
        rax: ctx.Rax,
        rbx: ctx.Rbx,
        rcx: ctx.Rcx,
        rdx: ctx.Rdx,
        rsp: ctx.Rsp,
        rbp: ctx.Rbp,
        rsi: ctx.Rsi,
        rdi: ctx.Rdi,
        r8: ctx.R8,
        r9: ctx.R9,
        r10: ctx.R10,
        r11: ctx.R11,
        r12: ctx.R12,
        r13: ctx.R13,
        r14: ctx.R14,
        r15: ctx.R15,
        rip: ctx.Rip,
    }
}

/// Write a handler-produced map back into the captured context. Only the
/// sixteen GPRs are replaced; Rip, flags, segments and FP state keep the
/// captured values.
pub fn merge_map(ctx: &mut CONTEXT, regs: &RegisterMap) {
    ctx.Rax = regs.rax;
    ctx.Rbx = regs.rbx;
    ctx.Rcx = regs.rcx;
    ctx.Rdx = regs.rdx;
    ctx.Rsp = regs.rsp;
    ctx.Rbp = regs.rbp;
    ctx.Rsi = regs.rsi;
    ctx.Rdi = regs.rdi;
    ctx.R8 = regs.r8;
    ctx.R9 = regs.r9;
    ctx.R10 = regs.r10;
    ctx.R11 = regs.r11;
    ctx.R12 = regs.r12;
    ctx.R13 = regs.r13;
    ctx.R14 = regs.r14;
    ctx.R15 = regs.r15;
}

/// Fetch a thread's context with the given flags.
pub(crate) fn read_context(thread: &ThreadHandle, flags: CONTEXT_FLAGS) -> Result<CONTEXT> {
    unsafe {
        let mut ctx = CONTEXT {
            ContextFlags: flags,
            ..Default::default()
        };
        GetThreadContext(thread.raw(), &mut ctx).map_err(|e| Error::ThreadOp {
            tid: thread.tid(),
            message: format!("GetThreadContext failed: {}", e),
        })?;
        Ok(ctx)
    }
}

/// Write a thread's context back.
pub(crate) fn write_context(thread: &ThreadHandle, ctx: &CONTEXT) -> Result<()> {
    unsafe {
        SetThreadContext(thread.raw(), ctx).map_err(|e| Error::ThreadOp {
            tid: thread.tid(),
            message: format!("SetThreadContext failed: {}", e),
        })
    }
}
