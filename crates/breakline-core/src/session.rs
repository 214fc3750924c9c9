//! Session controller and the process-wide session slot
//!
//! A [`DebugSession`] is created bound to a pid, populated with breakpoints,
//! started, and stopped. Once the event loop runs it owns the breakpoint
//! collections; mutating calls from any thread are rejected with
//! [`Error::Busy`] until `stop()` brings the loop down.

use crate::dr7;
use breakline_common::{
    BreakpointInfo, Error, HardwareBreakpoint, Result, SoftwareBreakpoint, HW_SLOT_COUNT,
};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Breakpoint collections. Owned by the event loop while it runs.
#[derive(Default)]
pub(crate) struct SessionState {
    pub(crate) hw_slots: [Option<HardwareBreakpoint>; HW_SLOT_COUNT],
    pub(crate) sw_breakpoints: Vec<SoftwareBreakpoint>,
}

impl SessionState {
    /// Addresses currently assigned to the four Dr slots.
    pub(crate) fn hw_addresses(&self) -> [Option<u64>; HW_SLOT_COUNT] {
        std::array::from_fn(|i| self.hw_slots[i].as_ref().map(|bp| bp.address))
    }

    pub(crate) fn hardware_at_mut(&mut self, address: u64) -> Option<&mut HardwareBreakpoint> {
        self.hw_slots
            .iter_mut()
            .flatten()
            .find(|bp| bp.address == address)
    }

    pub(crate) fn software_at_mut(&mut self, address: u64) -> Option<&mut SoftwareBreakpoint> {
        self.sw_breakpoints.iter_mut().find(|bp| bp.address == address)
    }

    pub(crate) fn clear_hardware(&mut self) {
        self.hw_slots = Default::default();
    }
}

/// A debugger session bound to one target process.
pub struct DebugSession {
    pid: u32,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) running: AtomicBool,
}

impl DebugSession {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            state: Mutex::new(SessionState::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::Busy(format!(
                "cannot {} while the event loop is running",
                what
            )));
        }
        Ok(())
    }

    /// Place a hardware breakpoint in a Dr slot, replacing any previous
    /// occupant of that slot.
    pub fn set_hw_breakpoint(&self, slot: usize, bp: HardwareBreakpoint) -> Result<()> {
        dr7::check_slot(slot)?;
        self.ensure_idle("install a hardware breakpoint")?;
        self.state.lock().hw_slots[slot] = Some(bp);
        Ok(())
    }

    /// Empty a Dr slot.
    pub fn clear_hw_breakpoint(&self, slot: usize) -> Result<()> {
        dr7::check_slot(slot)?;
        self.ensure_idle("clear a hardware breakpoint")?;
        self.state.lock().hw_slots[slot] = None;
        Ok(())
    }

    /// Register a software breakpoint. Addresses must be unique across the
    /// collection.
    pub fn add_sw_breakpoint(&self, bp: SoftwareBreakpoint) -> Result<()> {
        self.ensure_idle("add a software breakpoint")?;
        let mut state = self.state.lock();
        if state
            .sw_breakpoints
            .iter()
            .any(|existing| existing.address == bp.address)
        {
            return Err(Error::Breakpoint(format!(
                "breakpoint already registered at {:#x}",
                bp.address
            )));
        }
        state.sw_breakpoints.push(bp);
        Ok(())
    }

    /// Disarm (restore the original byte, if one is patched in) and drop
    /// the software breakpoint at `address`.
    pub fn remove_sw_breakpoint(&self, address: u64) -> Result<()> {
        self.ensure_idle("remove a software breakpoint")?;
        let mut state = self.state.lock();
        let index = state
            .sw_breakpoints
            .iter()
            .position(|bp| bp.address == address)
            .ok_or_else(|| Error::Breakpoint(format!("no breakpoint at {:#x}", address)))?;
        let bp = state.sw_breakpoints.remove(index);
        if let Some(original) = bp.original_byte.filter(|_| bp.armed) {
            self.disarm(address, original)?;
        }
        Ok(())
    }

    #[cfg(target_os = "windows")]
    fn disarm(&self, address: u64, original: u8) -> Result<()> {
        crate::memory::restore_software(self.pid, address, original)
    }

    #[cfg(not(target_os = "windows"))]
    fn disarm(&self, _address: u64, _original: u8) -> Result<()> {
        Ok(())
    }

    /// Snapshot every registered breakpoint.
    pub fn breakpoints(&self) -> Vec<BreakpointInfo> {
        let state = self.state.lock();
        let mut infos: Vec<BreakpointInfo> = state
            .hw_slots
            .iter()
            .flatten()
            .map(BreakpointInfo::from)
            .collect();
        infos.extend(state.sw_breakpoints.iter().map(BreakpointInfo::from));
        infos
    }

    /// Attach to the target and pump debug events until [`stop`] is called
    /// or the target exits. Blocks the calling thread; handlers run inline
    /// on it. May be called again after a stop.
    ///
    /// [`stop`]: DebugSession::stop
    #[cfg(target_os = "windows")]
    pub fn start(&self, bridge: &dyn breakline_common::HostBridge) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy("event loop is already running".into()));
        }
        let result = crate::event_loop::run(self, bridge);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Request shutdown: drop the running flag, clear the debug registers
    /// on every target thread, and nudge the blocked wait so the loop
    /// notices promptly. Best-effort; the loop restores software bytes and
    /// detaches on its way out.
    #[cfg(target_os = "windows")]
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Err(e) = crate::hardware::clear_all(self.pid) {
            tracing::warn!(target: "breakline_core::session", pid = self.pid, error = %e, "debug registers not fully cleared");
        }
        if was_running {
            crate::event_loop::wake(self.pid);
        }
    }
}

/// The process-wide session slot.
static CURRENT_SESSION: Lazy<RwLock<Option<Arc<DebugSession>>>> = Lazy::new(|| RwLock::new(None));

/// Create the process-wide session, replacing any stopped predecessor.
pub fn create_debugger(pid: u32) -> Result<Arc<DebugSession>> {
    let mut slot = CURRENT_SESSION.write();
    if let Some(existing) = slot.as_ref() {
        if existing.is_running() {
            return Err(Error::Busy(format!(
                "session for pid {} is still running",
                existing.pid()
            )));
        }
    }
    let session = Arc::new(DebugSession::new(pid));
    *slot = Some(Arc::clone(&session));
    tracing::info!(target: "breakline_core::session", pid = pid, "debugger created");
    Ok(session)
}

/// Handle to the current process-wide session, if one exists.
pub fn access_debugger() -> Option<Arc<DebugSession>> {
    CURRENT_SESSION.read().clone()
}
