//! Thread enumeration over a Toolhelp snapshot

use breakline_common::{Error, Result, ThreadInfo};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::Threading::{
    OpenThread, THREAD_ACCESS_RIGHTS, THREAD_GET_CONTEXT, THREAD_SET_CONTEXT,
    THREAD_SUSPEND_RESUME,
};

/// Scoped thread handle. Closes by value on drop so every return path
/// releases it.
pub struct ThreadHandle {
    handle: HANDLE,
    tid: u32,
}

impl ThreadHandle {
    pub fn open(tid: u32, access: THREAD_ACCESS_RIGHTS) -> Result<Self> {
        unsafe {
            OpenThread(access, false, tid)
                .map(|handle| Self { handle, tid })
                .map_err(|e| Error::ThreadOp {
                    tid,
                    message: format!("OpenThread failed: {}", e),
                })
        }
    }

    /// Open with the rights needed to suspend a foreign thread and rewrite
    /// its context.
    pub fn open_for_context(tid: u32) -> Result<Self> {
        Self::open(
            tid,
            THREAD_GET_CONTEXT | THREAD_SET_CONTEXT | THREAD_SUSPEND_RESUME,
        )
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Snapshot the live thread set of a process.
///
/// The snapshot is consistent only at capture time. Threads may exit before
/// a returned id is used; callers must tolerate per-thread failures.
pub fn enumerate_threads(pid: u32) -> Result<Vec<ThreadInfo>> {
    let mut threads = Vec::new();

    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)
            .map_err(|e| Error::Internal(format!("CreateToolhelp32Snapshot failed: {}", e)))?;

        struct SnapshotGuard(HANDLE);
        impl Drop for SnapshotGuard {
            fn drop(&mut self) {
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
        let _snapshot_guard = SnapshotGuard(snapshot);

        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            ..Default::default()
        };

        if Thread32First(snapshot, &mut entry).is_ok() {
            loop {
                if entry.th32OwnerProcessID == pid {
                    threads.push(ThreadInfo {
                        id: entry.th32ThreadID,
                        base_priority: entry.tpBasePri,
                    });
                }

                entry.dwSize = std::mem::size_of::<THREADENTRY32>() as u32;
                if Thread32Next(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }
    }

    Ok(threads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_own_process() {
        let threads = enumerate_threads(std::process::id()).unwrap();
        assert!(!threads.is_empty());
    }

    #[test]
    fn test_enumerate_unknown_pid_is_empty() {
        let threads = enumerate_threads(u32::MAX).unwrap();
        assert!(threads.is_empty());
    }

    #[test]
    fn test_thread_handle_open_and_close() {
        let tid = unsafe { windows::Win32::System::Threading::GetCurrentThreadId() };
        let handle = ThreadHandle::open(tid, THREAD_GET_CONTEXT).unwrap();
        assert_eq!(handle.tid(), tid);
        assert!(!handle.raw().is_invalid());
    }

    #[test]
    fn test_thread_handle_open_dead_tid_fails() {
        let result = ThreadHandle::open_for_context(0);
        assert!(matches!(result, Err(Error::ThreadOp { tid: 0, .. })));
    }
}
