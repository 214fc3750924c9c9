//! Byte patching in the target address space
//!
//! The patcher does not cache original bytes; it hands them back to the
//! caller, which stores them on the breakpoint entity. Handles are opened
//! and closed within each operation.

use breakline_common::{Error, Result, INT3};
use std::ffi::c_void;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Threading::{OpenProcess, PROCESS_ALL_ACCESS};

/// Scoped process handle. Closes by value on drop.
pub struct ProcessHandle {
    handle: HANDLE,
    pid: u32,
}

impl ProcessHandle {
    pub fn open(pid: u32) -> Result<Self> {
        unsafe {
            OpenProcess(PROCESS_ALL_ACCESS, false, pid)
                .map(|handle| Self { handle, pid })
                .map_err(|e| Error::Attach {
                    pid,
                    message: format!("OpenProcess failed: {}", e),
                })
        }
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Read one byte from the target.
pub fn read_byte(pid: u32, address: u64) -> Result<u8> {
    let process = ProcessHandle::open(pid)?;
    let mut byte = 0u8;
    let mut read = 0usize;
    unsafe {
        ReadProcessMemory(
            process.raw(),
            address as *const c_void,
            &mut byte as *mut u8 as *mut c_void,
            1,
            Some(&mut read),
        )
        .map_err(|e| Error::Memory {
            address,
            message: format!("ReadProcessMemory failed: {}", e),
        })?;
    }
    if read != 1 {
        return Err(Error::Memory {
            address,
            message: "short read".to_string(),
        });
    }
    Ok(byte)
}

fn write_byte(pid: u32, address: u64, byte: u8) -> Result<()> {
    let process = ProcessHandle::open(pid)?;
    let mut written = 0usize;
    unsafe {
        WriteProcessMemory(
            process.raw(),
            address as *const c_void,
            &byte as *const u8 as *const c_void,
            1,
            Some(&mut written),
        )
        .map_err(|e| Error::Memory {
            address,
            message: format!("WriteProcessMemory failed: {}", e),
        })?;
    }
    if written != 1 {
        return Err(Error::Memory {
            address,
            message: "short write".to_string(),
        });
    }
    Ok(())
}

/// Arm a software breakpoint: read the byte under `address`, write INT3,
/// and return what was read. The caller owns the capture-once cache.
pub fn arm_software(pid: u32, address: u64) -> Result<u8> {
    let original = read_byte(pid, address)?;
    write_byte(pid, address, INT3)?;
    Ok(original)
}

/// Put the original byte back at a previously armed address.
pub fn restore_software(pid: u32, address: u64, original: u8) -> Result<()> {
    write_byte(pid, address, original)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The patcher works on any pid it can open, including our own, which
    // gives the round-trip tests a live address space. The patched byte is
    // data, never code.

    #[test]
    fn test_read_byte_own_process() {
        let marker: u8 = 0x5A;
        let address = &marker as *const u8 as u64;
        assert_eq!(read_byte(std::process::id(), address).unwrap(), 0x5A);
    }

    #[test]
    fn test_arm_and_restore_round_trip() {
        let slot = Box::new(0x90u8);
        let address = &*slot as *const u8 as u64;
        let pid = std::process::id();

        let original = arm_software(pid, address).unwrap();
        assert_eq!(original, 0x90);
        assert_eq!(read_byte(pid, address).unwrap(), INT3);

        restore_software(pid, address, original).unwrap();
        assert_eq!(read_byte(pid, address).unwrap(), 0x90);
    }

    #[test]
    fn test_arm_unmapped_address_fails() {
        let result = arm_software(std::process::id(), 0x10);
        assert!(matches!(result, Err(Error::Memory { address: 0x10, .. })));
    }

    #[test]
    fn test_open_dead_pid_fails() {
        let result = ProcessHandle::open(u32::MAX - 1);
        assert!(matches!(result, Err(Error::Attach { .. })));
    }
}
