#![cfg(windows)]

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE,
};
use std::ptr;

pub unsafe fn reserve_region(size: usize) -> Option<*mut u8> {
    let ptr = VirtualAlloc(ptr::null_mut(), size, MEM_RESERVE, PAGE_NOACCESS);
    if ptr.is_null() {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

pub unsafe fn commit_region(ptr: *mut u8, size: usize) -> Result<(), i32> {
    let committed = VirtualAlloc(ptr as *const core::ffi::c_void, size, MEM_COMMIT, PAGE_READWRITE);
    if committed.is_null() {
        Err(GetLastError() as i32)
    } else {
        Ok(())
    }
}

pub unsafe fn release_region(ptr: *mut u8, _size: usize) {
    // MEM_RELEASE frees the entire region reserved by VirtualAlloc. Size must be 0.
    VirtualFree(ptr as *mut core::ffi::c_void, 0, MEM_RELEASE);
}
