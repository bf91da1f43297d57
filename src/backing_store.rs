//! The OS virtual-memory adapter.
//!
//! This is the only module that touches platform-specific memory APIs: an
//! anonymous, private `mmap`/`munmap` mapping on Unix, `VirtualAlloc`/
//! `VirtualFree` on Windows. Everything above this module deals in plain
//! byte pointers and never knows which platform it's running on.

use crate::error::HeapError;

/// A reserved, committed byte range obtained from the OS.
///
/// The pool never moves or grows for the lifetime of the [`Pool`] value.
/// Dropping or leaking a [`Pool`] without calling [`Pool::release`] leaks
/// the underlying OS mapping; [`crate::Heap`] always calls `release`
/// (explicitly via `destroy`, or best-effort on drop).
pub(crate) struct Pool {
    base: *mut u8,
    len: usize,
}

impl Pool {
    /// Reserves and commits `len` contiguous readable/writable bytes.
    pub(crate) fn acquire(len: usize) -> Result<Pool, HeapError> {
        let base = platform::acquire(len)?;
        log::debug!("backing store: acquired {len} bytes at {:p}", base);
        Ok(Pool { base, len })
    }

    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns the pool's bytes to the OS. Consumes `self` so the pool
    /// cannot be released twice through the same handle.
    pub(crate) fn release(self) -> Result<(), HeapError> {
        let base = self.base;
        let len = self.len;
        // Skip `Drop::drop` below: we are releasing right now and don't want
        // a second, best-effort release attempt to run on an already-freed
        // mapping.
        core::mem::forget(self);
        log::debug!("backing store: releasing {len} bytes at {:p}", base);
        platform::release(base, len)
    }
}

impl Drop for Pool {
    /// Best-effort release for pools that were never explicitly destroyed
    /// (e.g. the caller dropped a `Heap` without calling `destroy`). Errors
    /// are logged rather than propagated: `Drop` cannot return a `Result`,
    /// and the allocator's failure model never aborts the process.
    fn drop(&mut self) {
        if let Err(err) = platform::release(self.base, self.len) {
            log::error!("backing store: failed to release pool on drop: {err}");
        }
    }
}

#[cfg(unix)]
mod platform {
    use super::HeapError;
    use std::ffi::c_void;

    pub(super) fn acquire(len: usize) -> Result<*mut u8, HeapError> {
        // SAFETY: `MAP_ANONYMOUS | MAP_PRIVATE` with a null address and fd -1
        // requests a fresh, zero-filled mapping from the OS; `len` is the
        // only input that affects memory safety here, and a non-zero `len`
        // is the caller's responsibility (enforced in `heap::init_with_size`).
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            // SAFETY: reading `errno` immediately after the failing call.
            let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            return Err(HeapError::BackingStore { code });
        }

        Ok(addr as *mut u8)
    }

    pub(super) fn release(base: *mut u8, len: usize) -> Result<(), HeapError> {
        // SAFETY: `base`/`len` are exactly the values returned by a prior
        // `acquire` call; the caller guarantees it is not releasing a pool
        // that is still in use.
        let result = unsafe { libc::munmap(base as *mut c_void, len) };
        if result != 0 {
            let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            return Err(HeapError::BackingStore { code });
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use super::HeapError;
    use windows::Win32::Foundation::GetLastError;
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };

    pub(super) fn acquire(len: usize) -> Result<*mut u8, HeapError> {
        // SAFETY: a null `lpAddress` lets the OS choose the base address;
        // `len` is the only input that affects memory safety, and a
        // non-zero `len` is the caller's responsibility.
        let addr = unsafe {
            VirtualAlloc(
                None,
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };

        if addr.is_null() {
            // SAFETY: reading the last error immediately after the failing call.
            let code = unsafe { GetLastError().0 as i32 };
            return Err(HeapError::BackingStore { code });
        }

        Ok(addr as *mut u8)
    }

    pub(super) fn release(base: *mut u8, _len: usize) -> Result<(), HeapError> {
        // SAFETY: `base` is exactly the value returned by a prior `acquire`
        // call; `MEM_RELEASE` requires the original reservation's base
        // address and a size of zero.
        let ok = unsafe { VirtualFree(base as _, 0, MEM_RELEASE) };
        if ok.is_err() {
            let code = unsafe { GetLastError().0 as i32 };
            return Err(HeapError::BackingStore { code });
        }
        Ok(())
    }
}
