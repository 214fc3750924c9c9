//! Debug privilege control for the host process

use breakline_common::{Error, Result};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, LUID};
use windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
    TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

const DEBUG_PRIVILEGE: &str = "SeDebugPrivilege";

/// Toggle SeDebugPrivilege on the current process token. Idempotent; called
/// before every attach attempt.
pub fn set_debug_privilege(enable: bool) -> Result<()> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .map_err(|e| Error::Privilege(format!("OpenProcessToken failed: {}", e)))?;

        struct TokenGuard(HANDLE);
        impl Drop for TokenGuard {
            fn drop(&mut self) {
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
        let _token_guard = TokenGuard(token);

        let name: Vec<u16> = DEBUG_PRIVILEGE
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let mut luid = LUID::default();
        LookupPrivilegeValueW(None, PCWSTR(name.as_ptr()), &mut luid)
            .map_err(|e| Error::Privilege(format!("LookupPrivilegeValueW failed: {}", e)))?;

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: if enable {
                    SE_PRIVILEGE_ENABLED
                } else {
                    Default::default()
                },
            }],
        };

        AdjustTokenPrivileges(token, false, Some(&privileges), 0, None, None)
            .map_err(|e| Error::Privilege(format!("AdjustTokenPrivileges failed: {}", e)))?;
    }

    tracing::debug!(target: "breakline_core::privilege", enable = enable, "debug privilege adjusted");
    Ok(())
}

pub fn enable_debug_privilege() -> Result<()> {
    set_debug_privilege(true)
}
