//! Breakpoint entities and their serializable snapshots

use crate::error::Result;
use crate::types::registers::RegisterMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// INT3 opcode written over the first byte of a patched instruction.
pub const INT3: u8 = 0xCC;

/// Number of hardware breakpoint slots (Dr0-Dr3) on x86_64.
pub const HW_SLOT_COUNT: usize = 4;

/// Callback invoked while the interrupted thread is held by the debugger.
///
/// The handler receives the thread's register map and returns the map to
/// write back; returning the input unchanged is the identity operation. An
/// `Err` return is logged by the event loop and treated as the identity map.
pub trait HitHandler: Send {
    fn on_hit(&mut self, regs: RegisterMap) -> Result<RegisterMap>;
}

impl<F> HitHandler for F
where
    F: FnMut(RegisterMap) -> Result<RegisterMap> + Send,
{
    fn on_hit(&mut self, regs: RegisterMap) -> Result<RegisterMap> {
        self(regs)
    }
}

/// Boxed handler stored on a breakpoint.
pub type Handler = Box<dyn HitHandler>;

/// An execute breakpoint programmed into one of the four Dr slots. No
/// target memory is modified.
pub struct HardwareBreakpoint {
    pub address: u64,
    pub hit_count: u64,
    pub handler: Handler,
}

impl HardwareBreakpoint {
    pub fn new(address: u64, handler: impl HitHandler + 'static) -> Self {
        Self {
            address,
            hit_count: 0,
            handler: Box::new(handler),
        }
    }
}

/// An INT3 breakpoint patched over the first byte of the target instruction.
pub struct SoftwareBreakpoint {
    pub address: u64,
    /// Byte found under the patch, captured the first time the breakpoint
    /// is armed. `None` until then.
    pub original_byte: Option<u8>,
    /// True while an INT3 is currently written at `address`.
    pub armed: bool,
    pub hit_count: u64,
    pub handler: Handler,
}

impl SoftwareBreakpoint {
    pub fn new(address: u64, handler: impl HitHandler + 'static) -> Self {
        Self {
            address,
            original_byte: None,
            armed: false,
            hit_count: 0,
            handler: Box::new(handler),
        }
    }

    /// Construct with a host-supplied original byte, for hosts that already
    /// know the instruction stream. The seeded byte counts as the one-time
    /// capture.
    pub fn with_original_byte(address: u64, original_byte: u8, handler: impl HitHandler + 'static) -> Self {
        Self {
            original_byte: Some(original_byte),
            ..Self::new(address, handler)
        }
    }

    /// Record the byte found under the patch. Only the first call sticks;
    /// later arms must not overwrite the cache with a stale 0xCC.
    pub fn capture_original(&mut self, byte: u8) {
        if self.original_byte.is_none() {
            self.original_byte = Some(byte);
        }
    }
}

// Identity is the address alone; this is the key used for removal.
impl PartialEq for HardwareBreakpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for HardwareBreakpoint {}

impl PartialEq for SoftwareBreakpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for SoftwareBreakpoint {}

impl fmt::Debug for HardwareBreakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareBreakpoint")
            .field("address", &format_args!("{:#x}", self.address))
            .field("hit_count", &self.hit_count)
            .finish()
    }
}

impl fmt::Debug for SoftwareBreakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareBreakpoint")
            .field("address", &format_args!("{:#x}", self.address))
            .field("original_byte", &self.original_byte)
            .field("armed", &self.armed)
            .field("hit_count", &self.hit_count)
            .finish()
    }
}

/// Breakpoint flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

/// Serializable snapshot of a live breakpoint, as returned by the session's
/// listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub address: u64,
    pub kind: BreakpointKind,
    pub armed: bool,
    pub hit_count: u64,
}

impl From<&HardwareBreakpoint> for BreakpointInfo {
    fn from(bp: &HardwareBreakpoint) -> Self {
        BreakpointInfo {
            address: bp.address,
            kind: BreakpointKind::Hardware,
            armed: true,
            hit_count: bp.hit_count,
        }
    }
}

impl From<&SoftwareBreakpoint> for BreakpointInfo {
    fn from(bp: &SoftwareBreakpoint) -> Self {
        BreakpointInfo {
            address: bp.address,
            kind: BreakpointKind::Software,
            armed: bp.armed,
            hit_count: bp.hit_count,
        }
    }
}
