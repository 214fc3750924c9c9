//! Attach, pump, classify and dispatch debug events
//!
//! One OS thread drives the loop for the lifetime of `start()`. It blocks
//! in WaitForDebugEvent and yields only there or inside a user handler.
//! Handlers run inline, so no two handlers ever overlap, and the thread
//! that took the exception stays held until its handler has returned and
//! the event is continued.

use crate::context::{self, CONTEXT_ALL};
use crate::hardware;
use crate::memory::{self, ProcessHandle};
use crate::session::DebugSession;
use crate::threads::ThreadHandle;
use breakline_common::{Error, Handler, HostBridge, Result, RESUME_FLAG};
use std::sync::atomic::Ordering;
use windows::Win32::Foundation::{DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, NTSTATUS};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DebugActiveProcess, DebugActiveProcessStop, DebugBreakProcess,
    DebugSetProcessKillOnExit, WaitForDebugEvent, CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT,
    EXCEPTION_DEBUG_EVENT, EXIT_PROCESS_DEBUG_EVENT,
};
use windows::Win32::System::Threading::INFINITE;

/// Exception subcodes the loop demultiplexes on.
const EXCEPTION_BREAKPOINT: u32 = 0x8000_0003;
const EXCEPTION_SINGLE_STEP: u32 = 0x8000_0004;

/// Drive a session: attach, program the hardware slots, pump events until
/// the running flag drops, then unwind.
pub(crate) fn run(session: &DebugSession, bridge: &dyn HostBridge) -> Result<()> {
    let pid = session.pid();

    crate::privilege::enable_debug_privilege()?;
    attach(pid)?;

    // Initial hardware fan-out over the threads alive right now. Later
    // threads are covered as their creation events arrive.
    let addresses = session.state.lock().hw_addresses();
    if addresses.iter().any(Option::is_some) {
        if let Err(e) = hardware::apply_slots(pid, &addresses) {
            tracing::warn!(target: "breakline_core::event_loop", pid = pid, error = %e, "initial hardware programming incomplete");
        }
    }

    bridge.release_host_lock();
    let result = pump(session, bridge, pid);
    unwind(session, pid);
    bridge.acquire_host_lock();
    result
}

fn attach(pid: u32) -> Result<()> {
    unsafe {
        DebugActiveProcess(pid).map_err(|e| Error::Attach {
            pid,
            message: format!("DebugActiveProcess failed: {}", e),
        })?;
        // The target must outlive us on detach.
        if let Err(e) = DebugSetProcessKillOnExit(false) {
            tracing::warn!(target: "breakline_core::event_loop", error = %e, "DebugSetProcessKillOnExit failed");
        }
    }
    tracing::info!(target: "breakline_core::event_loop", pid = pid, "attached");
    Ok(())
}

fn pump(session: &DebugSession, bridge: &dyn HostBridge, pid: u32) -> Result<()> {
    // The break-in thread the OS injects on attach raises one breakpoint
    // that belongs to nobody's collection; swallowing it keeps the target
    // alive.
    let mut saw_break_in = false;

    while session.running.load(Ordering::SeqCst) {
        // Re-arm every software breakpoint. A breakpoint serviced on the
        // previous iteration was disarmed for its hit and needs its INT3
        // back now that the original instruction has executed.
        arm_all(session, pid);

        let mut event = DEBUG_EVENT::default();
        if let Err(e) = unsafe { WaitForDebugEvent(&mut event, INFINITE) } {
            return Err(Error::Internal(format!("WaitForDebugEvent failed: {}", e)));
        }
        let event_pid = event.dwProcessId;
        let tid = event.dwThreadId;

        // A stop request may have landed while we were blocked; release
        // whatever woke us and leave.
        if !session.running.load(Ordering::SeqCst) {
            continue_event(event_pid, tid, DBG_CONTINUE);
            break;
        }

        let mut status = DBG_EXCEPTION_NOT_HANDLED;
        match event.dwDebugEventCode {
            EXCEPTION_DEBUG_EVENT => {
                let (code, address) = unsafe {
                    let record = &event.u.Exception.ExceptionRecord;
                    (record.ExceptionCode.0 as u32, record.ExceptionAddress as u64)
                };
                match code {
                    EXCEPTION_SINGLE_STEP => {
                        if dispatch_hardware(session, bridge, tid, address) {
                            status = DBG_CONTINUE;
                        }
                    }
                    EXCEPTION_BREAKPOINT => {
                        if dispatch_software(session, bridge, pid, tid, address) {
                            status = DBG_CONTINUE;
                        } else if !saw_break_in {
                            saw_break_in = true;
                            status = DBG_CONTINUE;
                        }
                        // Any other unmatched INT3 belongs to the target;
                        // forward it.
                    }
                    _ => {
                        tracing::trace!(target: "breakline_core::event_loop", code = code, address = format!("{:#x}", address), "unrelated exception forwarded");
                    }
                }
            }
            CREATE_THREAD_DEBUG_EVENT => {
                // Extend hardware coverage to threads born mid-session.
                let addresses = session.state.lock().hw_addresses();
                if addresses.iter().any(Option::is_some) {
                    if let Err(e) = hardware::apply_slots_to_thread(tid, &addresses) {
                        tracing::debug!(target: "breakline_core::event_loop", tid = tid, error = %e, "new thread not programmed");
                    }
                }
                status = DBG_CONTINUE;
            }
            EXIT_PROCESS_DEBUG_EVENT => {
                tracing::info!(target: "breakline_core::event_loop", pid = pid, "target exited");
                session.running.store(false, Ordering::SeqCst);
                continue_event(event_pid, tid, DBG_CONTINUE);
                break;
            }
            _ => {}
        }

        continue_event(event_pid, tid, status);
    }

    Ok(())
}

fn continue_event(pid: u32, tid: u32, status: NTSTATUS) {
    unsafe {
        if let Err(e) = ContinueDebugEvent(pid, tid, status) {
            tracing::warn!(target: "breakline_core::event_loop", tid = tid, error = %e, "ContinueDebugEvent failed");
        }
    }
}

/// Write INT3 over every registered software breakpoint, capturing original
/// bytes the first time each is armed.
fn arm_all(session: &DebugSession, pid: u32) {
    let mut state = session.state.lock();
    for bp in state.sw_breakpoints.iter_mut() {
        match memory::arm_software(pid, bp.address) {
            Ok(original) => {
                bp.capture_original(original);
                bp.armed = true;
            }
            Err(e) => {
                tracing::warn!(target: "breakline_core::event_loop", address = format!("{:#x}", bp.address), error = %e, "failed to arm breakpoint");
            }
        }
    }
}

/// Service a single-step exception as a hardware-breakpoint hit. Returns
/// true when the address matched a slot and the thread was serviced.
fn dispatch_hardware(
    session: &DebugSession,
    bridge: &dyn HostBridge,
    tid: u32,
    address: u64,
) -> bool {
    let mut state = session.state.lock();
    let Some(bp) = state.hardware_at_mut(address) else {
        return false;
    };
    bp.hit_count += 1;
    tracing::debug!(
        target: "breakline_core::event_loop",
        address = format!("{:#x}", address),
        tid = tid,
        hits = bp.hit_count,
        "hardware breakpoint hit"
    );
    match service_hit(bridge, tid, &mut bp.handler, false) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(target: "breakline_core::event_loop", tid = tid, error = %e, "hardware hit not serviced");
            false
        }
    }
}

/// Service a breakpoint exception as a software-breakpoint hit: disarm,
/// invoke the handler, rewind Rip past the trap byte. Returns true when the
/// address matched; the INT3 is re-armed at the top of the next iteration.
fn dispatch_software(
    session: &DebugSession,
    bridge: &dyn HostBridge,
    pid: u32,
    tid: u32,
    address: u64,
) -> bool {
    let mut state = session.state.lock();
    let Some(bp) = state.software_at_mut(address) else {
        return false;
    };
    let Some(original) = bp.original_byte else {
        // Registered but never armed by us; not our trap.
        return false;
    };

    if let Err(e) = memory::restore_software(pid, address, original) {
        tracing::warn!(target: "breakline_core::event_loop", address = format!("{:#x}", address), error = %e, "could not disarm breakpoint");
        return false;
    }
    bp.armed = false;
    bp.hit_count += 1;
    tracing::debug!(
        target: "breakline_core::event_loop",
        address = format!("{:#x}", address),
        tid = tid,
        hits = bp.hit_count,
        "software breakpoint hit"
    );

    if let Err(e) = service_hit(bridge, tid, &mut bp.handler, true) {
        tracing::warn!(target: "breakline_core::event_loop", tid = tid, error = %e, "software hit partially serviced");
    }
    // The byte is restored either way; continuing is the recoverable path.
    true
}

/// Capture the thread's registers, run the handler between the host-lock
/// hooks, merge its output and resume state back into the thread.
fn service_hit(
    bridge: &dyn HostBridge,
    tid: u32,
    handler: &mut Handler,
    rewind_rip: bool,
) -> Result<()> {
    let thread = ThreadHandle::open_for_context(tid)?;
    let mut ctx = context::read_context(&thread, CONTEXT_ALL)?;

    let snapshot = context::context_to_map(&ctx);
    bridge.acquire_host_lock();
    let outcome = handler.on_hit(snapshot);
    bridge.release_host_lock();

    let merged = match outcome {
        Ok(map) => map,
        Err(e) => {
            // A failing handler must not leave the target wedged; resume
            // with the pre-call registers.
            let err = Error::Callback(e.to_string());
            tracing::warn!(target: "breakline_core::event_loop", tid = tid, error = %err, "handler failed, resuming with identity map");
            snapshot
        }
    };
    context::merge_map(&mut ctx, &merged);

    if rewind_rip {
        // INT3 advanced Rip past the trap byte; rewind so the restored
        // instruction executes next.
        ctx.Rip -= 1;
    }
    ctx.EFlags |= RESUME_FLAG;

    context::write_context(&thread, &ctx)
}

/// Loop epilogue: restore every armed byte exactly once, drop the hardware
/// slots everywhere, detach.
fn unwind(session: &DebugSession, pid: u32) {
    {
        let mut state = session.state.lock();
        for bp in state.sw_breakpoints.iter_mut() {
            if !bp.armed {
                continue;
            }
            if let Some(original) = bp.original_byte {
                match memory::restore_software(pid, bp.address, original) {
                    Ok(()) => bp.armed = false,
                    Err(e) => {
                        tracing::warn!(target: "breakline_core::event_loop", address = format!("{:#x}", bp.address), error = %e, "original byte not restored");
                    }
                }
            }
        }
        state.clear_hardware();
    }

    if let Err(e) = hardware::clear_all(pid) {
        tracing::warn!(target: "breakline_core::event_loop", pid = pid, error = %e, "debug registers not fully cleared");
    }

    unsafe {
        if let Err(e) = DebugActiveProcessStop(pid) {
            tracing::warn!(target: "breakline_core::event_loop", pid = pid, error = %e, "detach failed");
        }
    }
    tracing::info!(target: "breakline_core::event_loop", pid = pid, "detached");
}

/// Nudge a loop blocked in WaitForDebugEvent with a benign break-in so a
/// stop request is noticed promptly.
pub(crate) fn wake(pid: u32) {
    match ProcessHandle::open(pid) {
        Ok(process) => unsafe {
            if let Err(e) = DebugBreakProcess(process.raw()) {
                tracing::debug!(target: "breakline_core::event_loop", pid = pid, error = %e, "wake-up injection failed");
            }
        },
        Err(e) => {
            tracing::debug!(target: "breakline_core::event_loop", pid = pid, error = %e, "wake-up skipped");
        }
    }
}
