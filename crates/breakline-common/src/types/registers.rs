//! General-purpose register map passed to breakpoint handlers

use serde::{Deserialize, Serialize};

/// EFlags resume-flag bit (RF). Suppresses exactly one instruction-boundary
/// breakpoint fault after the next resume.
pub const RESUME_FLAG: u32 = 0x10000;

/// EFlags trap-flag bit (TF). Single-steps the next instruction. The engine
/// resumes a serviced breakpoint with [`RESUME_FLAG`], never TF.
pub const TRAP_FLAG: u32 = 0x100;

/// Names of the sixteen general-purpose registers, in map order.
pub const GPR_NAMES: [&str; 16] = [
    "rax", "rbx", "rcx", "rdx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// The x86_64 general-purpose register file handed to breakpoint handlers.
///
/// Handlers may rewrite any of the sixteen GPRs; all other fields of the
/// captured thread context (segments, flags, FP state) are preserved on
/// write-back. `rip` is a snapshot of the interrupted instruction pointer
/// and is ignored when the map is written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
}

impl RegisterMap {
    /// Look up a register by name (case-insensitive). `rip` is readable
    /// here like any GPR.
    pub fn get(&self, name: &str) -> Option<u64> {
        match name.to_ascii_lowercase().as_str() {
            "rax" => Some(self.rax),
            "rbx" => Some(self.rbx),
            "rcx" => Some(self.rcx),
            "rdx" => Some(self.rdx),
            "rsp" => Some(self.rsp),
            "rbp" => Some(self.rbp),
            "rsi" => Some(self.rsi),
            "rdi" => Some(self.rdi),
            "r8" => Some(self.r8),
            "r9" => Some(self.r9),
            "r10" => Some(self.r10),
            "r11" => Some(self.r11),
            "r12" => Some(self.r12),
            "r13" => Some(self.r13),
            "r14" => Some(self.r14),
            "r15" => Some(self.r15),
            "rip" => Some(self.rip),
            _ => None,
        }
    }

    /// Assign a register by name (case-insensitive). Returns false for an
    /// unknown name or for `rip`, which write-back does not honor.
    pub fn set(&mut self, name: &str, value: u64) -> bool {
        let field = match name.to_ascii_lowercase().as_str() {
            "rax" => &mut self.rax,
            "rbx" => &mut self.rbx,
            "rcx" => &mut self.rcx,
            "rdx" => &mut self.rdx,
            "rsp" => &mut self.rsp,
            "rbp" => &mut self.rbp,
            "rsi" => &mut self.rsi,
            "rdi" => &mut self.rdi,
            "r8" => &mut self.r8,
            "r9" => &mut self.r9,
            "r10" => &mut self.r10,
            "r11" => &mut self.r11,
            "r12" => &mut self.r12,
            "r13" => &mut self.r13,
            "r14" => &mut self.r14,
            "r15" => &mut self.r15,
            _ => return false,
        };
        *field = value;
        true
    }
}
