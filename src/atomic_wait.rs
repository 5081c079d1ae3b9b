// Thin futex wrapper, in the spirit of https://docs.rs/atomic-wait.
// Extended from the original AtomicBool-only version to also support
// AtomicU32, since the forward/backward handshake (see `handshake`) needs
// a counting wait, not just a boolean one.
#![allow(dead_code)]

#[cfg(target_os = "linux")]
pub mod platform {
    use core::sync::atomic::{AtomicBool, AtomicU32};
    use libc;

    #[inline]
    pub fn wait(a: &AtomicBool, expected: bool) {
        let expected_int = if expected { 1 } else { 0 };
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                a as *const _ as *const i32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected_int,
                core::ptr::null::<libc::timespec>(),
            );
        }
    }

    #[inline]
    pub fn wake_one(ptr: *const AtomicBool) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                ptr as *const _ as *const i32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
            );
        }
    }

    #[inline]
    pub fn wake_all(ptr: *const AtomicBool) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                ptr as *const _ as *const i32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
            );
        }
    }

    #[inline]
    pub fn wait_u32(a: &AtomicU32, expected: u32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                a as *const _ as *const i32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected as i32,
                core::ptr::null::<libc::timespec>(),
            );
        }
    }

    #[inline]
    pub fn wake_one_u32(ptr: *const AtomicU32) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                ptr as *const _ as *const i32,
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                1i32,
            );
        }
    }
}

#[cfg(target_os = "freebsd")]
pub mod platform {
    use core::sync::atomic::{AtomicBool, AtomicU32};
    use libc;

    #[inline]
    pub fn wait(a: &AtomicBool, expected: bool) {
        let expected_int = if expected { 1 } else { 0 };
        let ptr: *const AtomicBool = a;
        unsafe {
            libc::_umtx_op(
                ptr as *mut libc::c_void,
                libc::UMTX_OP_WAIT_UINT_PRIVATE,
                expected_int as libc::c_ulong,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        };
    }

    #[inline]
    pub fn wake_one(ptr: *const AtomicBool) {
        unsafe {
            libc::_umtx_op(
                ptr as *mut libc::c_void,
                libc::UMTX_OP_WAKE_PRIVATE,
                1 as libc::c_ulong,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        };
    }

    #[inline]
    pub fn wake_all(ptr: *const AtomicBool) {
        unsafe {
            libc::_umtx_op(
                ptr as *mut libc::c_void,
                libc::UMTX_OP_WAKE_PRIVATE,
                i32::MAX as libc::c_ulong,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        };
    }

    #[inline]
    pub fn wait_u32(a: &AtomicU32, expected: u32) {
        let ptr: *const AtomicU32 = a;
        unsafe {
            libc::_umtx_op(
                ptr as *mut libc::c_void,
                libc::UMTX_OP_WAIT_UINT_PRIVATE,
                expected as libc::c_ulong,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        };
    }

    #[inline]
    pub fn wake_one_u32(ptr: *const AtomicU32) {
        unsafe {
            libc::_umtx_op(
                ptr as *mut libc::c_void,
                libc::UMTX_OP_WAKE_PRIVATE,
                1 as libc::c_ulong,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        };
    }
}

// Portable fallback for platforms without a futex syscall (e.g. macOS, Windows).
// Busy-waits with a short backoff instead of blocking in the kernel; correctness
// doesn't depend on true blocking, only on eventually observing the new value.
#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
pub mod platform {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    #[inline]
    pub fn wait(a: &AtomicBool, expected: bool) {
        while a.load(Ordering::Acquire) == expected {
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    #[inline]
    pub fn wake_one(_ptr: *const AtomicBool) {}

    #[inline]
    pub fn wake_all(_ptr: *const AtomicBool) {}

    #[inline]
    pub fn wait_u32(a: &AtomicU32, expected: u32) {
        while a.load(Ordering::Acquire) == expected {
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    #[inline]
    pub fn wake_one_u32(_ptr: *const AtomicU32) {}
}
