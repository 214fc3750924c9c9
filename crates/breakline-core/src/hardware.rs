//! Debug-register programming across the target's thread population
//!
//! Dr0-Dr3 hold one hardware-breakpoint address each; Dr7 enables them.
//! Programming fans out over a thread snapshot and is best-effort per
//! thread, because threads of a live target die mid-enumeration.

use crate::context::{read_context, write_context};
use crate::dr7;
use crate::threads::{self, ThreadHandle};
use breakline_common::{Error, Result, HW_SLOT_COUNT};
use windows::Win32::System::Diagnostics::Debug::CONTEXT_DEBUG_REGISTERS_AMD64;
use windows::Win32::System::Threading::{ResumeThread, SuspendThread};

/// Raw Dr register values read back from one thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrState {
    pub dr: [u64; HW_SLOT_COUNT],
    pub dr7: u64,
}

/// Program Dr0-Dr3 and Dr7 on a single thread of the target.
pub fn apply_slots_to_thread(tid: u32, slots: &[Option<u64>; HW_SLOT_COUNT]) -> Result<()> {
    let thread = ThreadHandle::open_for_context(tid)?;
    unsafe {
        if SuspendThread(thread.raw()) == u32::MAX {
            return Err(Error::ThreadOp {
                tid,
                message: "SuspendThread failed".to_string(),
            });
        }
        let result = program_registers(&thread, slots);
        ResumeThread(thread.raw());
        result
    }
}

fn program_registers(thread: &ThreadHandle, slots: &[Option<u64>; HW_SLOT_COUNT]) -> Result<()> {
    let mut ctx = read_context(thread, CONTEXT_DEBUG_REGISTERS_AMD64)?;
    ctx.Dr0 = slots[0].unwrap_or(0);
    ctx.Dr1 = slots[1].unwrap_or(0);
    ctx.Dr2 = slots[2].unwrap_or(0);
    ctx.Dr3 = slots[3].unwrap_or(0);
    ctx.Dr7 = dr7::dr7_value(slots);
    write_context(thread, &ctx)
}

/// Fan the slot assignment out over every live thread of the target.
///
/// Per-thread failures are counted and logged, not fatal; only zero
/// programmed threads is an error. Returns the number programmed.
pub fn apply_slots(pid: u32, slots: &[Option<u64>; HW_SLOT_COUNT]) -> Result<u32> {
    let mut programmed = 0u32;
    let mut failed = 0u32;

    for thread in threads::enumerate_threads(pid)? {
        match apply_slots_to_thread(thread.id, slots) {
            Ok(()) => programmed += 1,
            Err(e) => {
                failed += 1;
                tracing::debug!(target: "breakline_core::hardware", tid = thread.id, error = %e, "thread skipped");
            }
        }
    }

    if programmed == 0 {
        return Err(Error::ThreadOp {
            tid: 0,
            message: format!("no thread of pid {} could be programmed", pid),
        });
    }
    if failed > 0 {
        tracing::warn!(
            target: "breakline_core::hardware",
            pid = pid,
            programmed = programmed,
            failed = failed,
            "some threads were not programmed"
        );
    }
    tracing::debug!(
        target: "breakline_core::hardware",
        pid = pid,
        threads = programmed,
        dr7 = dr7::dr7_value(slots),
        "debug registers applied"
    );
    Ok(programmed)
}

/// Zero every Dr slot, and thereby Dr7, on every thread.
pub fn clear_all(pid: u32) -> Result<u32> {
    apply_slots(pid, &[None; HW_SLOT_COUNT])
}

/// Read the Dr registers of one thread, for verification.
pub fn read_thread_slots(tid: u32) -> Result<DrState> {
    let thread = ThreadHandle::open_for_context(tid)?;
    unsafe {
        if SuspendThread(thread.raw()) == u32::MAX {
            return Err(Error::ThreadOp {
                tid,
                message: "SuspendThread failed".to_string(),
            });
        }
        let result = read_context(&thread, CONTEXT_DEBUG_REGISTERS_AMD64);
        ResumeThread(thread.raw());
        let ctx = result?;
        Ok(DrState {
            dr: [ctx.Dr0, ctx.Dr1, ctx.Dr2, ctx.Dr3],
            dr7: ctx.Dr7,
        })
    }
}
