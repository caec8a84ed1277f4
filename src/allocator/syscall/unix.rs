#![cfg(unix)]

use libc::{c_void, mmap, mprotect, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_NONE, PROT_READ, PROT_WRITE};
use std::ptr;

/// Reserves `size` bytes of address space without making them accessible.
/// Returns a pointer to the start of the range, or None if the reservation failed.
pub unsafe fn reserve_region(size: usize) -> Option<*mut u8> {
    let ptr = mmap(
        ptr::null_mut(),
        size,
        PROT_NONE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
    );

    if ptr == MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

/// Makes `[ptr, ptr + size)` of a reservation readable and writable.
pub unsafe fn commit_region(ptr: *mut u8, size: usize) -> Result<(), i32> {
    if mprotect(ptr as *mut c_void, size, PROT_READ | PROT_WRITE) == 0 {
        Ok(())
    } else {
        Err(last_os_error())
    }
}

pub unsafe fn release_region(ptr: *mut u8, size: usize) {
    munmap(ptr as *mut c_void, size);
}

fn last_os_error() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
