//! Thin libc wrappers shared by the epoll and socket layers.

/// Calls a libc function and turns a `-1` return into the last OS error.
///
/// Mirrors the pattern used throughout `sys::epoll`/`sys::eventfd`: every
/// raw syscall goes through this so error handling doesn't get duplicated at
/// each call site.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod epoll;
pub mod eventfd;
pub mod fd;
