//! zlib-compatible `alloc_func`/`free_func` hooks.
//!
//! zlib's public C API lets a caller supply its own allocator via a pair of
//! function pointers plus an opaque `void*` cookie threaded through both
//! calls. This module provides that pair over the plain system allocator,
//! wrapped behind an opaque cookie the way zlib expects, so that the
//! archive reader can hand zlib an allocator when one is required without
//! leaking a raw `malloc`/`free` pair into the rest of the crate.
//!
//! The raw pointer zlib passes back to `zfree` carries no size information,
//! so these hooks cannot recycle buffers through [`crate::pool::Arena`] —
//! only `std::alloc` can free a pointer it didn't hand out with a
//! provenance-matching layout. An allocation header recording the original
//! `Layout` is stashed just before the pointer returned to zlib so `zfree`
//! can reconstruct it.
//!
//! `flate2`'s default backend, `miniz_oxide`, is a pure-Rust
//! reimplementation that never calls these hooks at all; they only take
//! effect if the crate is built against a C zlib backend (e.g. `flate2`'s
//! `zlib` or `zlib-ng-compat` feature) that honors `zalloc`/`zfree`. They
//! are provided unconditionally so switching backends is a Cargo feature
//! flip rather than a code change.

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::ptr;

/// C ABI signature zlib expects for its allocation callback:
/// `voidpf zalloc(voidpf opaque, uInt items, uInt size)`.
pub type AllocFunc =
    unsafe extern "C" fn(opaque: *mut c_void, items: u32, size: u32) -> *mut c_void;

/// C ABI signature zlib expects for its free callback:
/// `void zfree(voidpf opaque, voidpf address)`.
pub type FreeFunc = unsafe extern "C" fn(opaque: *mut c_void, address: *mut c_void);

/// Alignment used for every allocation made through these hooks. zlib's
/// internal structures have no alignment requirement beyond pointer size.
const ALIGN: usize = align_of::<usize>();

#[repr(C)]
struct AllocationHeader {
    size: usize,
}

const HEADER_SIZE: usize = size_of::<AllocationHeader>();

/// Opaque cookie passed as zlib's `opaque` argument. Holds no state beyond
/// existing, but gives [`zlib_alloc`]/[`zlib_free`] a non-null pointer to
/// satisfy the C ABI's `opaque` slot and a place to hang future
/// bookkeeping (allocation counters, a bound arena) without changing the
/// function signatures zlib calls.
#[derive(Default)]
pub struct ZlibCookie {
    _private: (),
}

impl ZlibCookie {
    /// Create a new cookie, heap-allocated so its address is stable for
    /// the lifetime of the zlib stream it's bound to.
    pub fn new() -> Box<Self> {
        Box::default()
    }

    /// Raw pointer to hand to zlib as the `opaque` argument. The cookie
    /// must outlive every call to [`zlib_alloc`]/[`zlib_free`] made with
    /// this pointer.
    pub fn as_opaque(self: &mut Box<Self>) -> *mut c_void {
        std::ptr::addr_of_mut!(**self).cast::<c_void>()
    }
}

/// zlib-compatible allocation hook. Returns null on overflow or on
/// allocator failure, as zlib's contract requires.
///
/// # Safety
///
/// Every non-null pointer this function returns must eventually be passed
/// to [`zlib_free`] exactly once, and never dereferenced past `items *
/// size` bytes.
pub unsafe extern "C" fn zlib_alloc(_opaque: *mut c_void, items: u32, size: u32) -> *mut c_void {
    let Some(requested) = (items as usize).checked_mul(size as usize) else {
        return ptr::null_mut();
    };
    let Some(total) = requested.checked_add(HEADER_SIZE) else {
        return ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, ALIGN) else {
        return ptr::null_mut();
    };

    let base = unsafe { alloc::alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }

    unsafe {
        base.cast::<AllocationHeader>()
            .write(AllocationHeader { size: total });
    }
    unsafe { base.add(HEADER_SIZE).cast::<c_void>() }
}

/// zlib-compatible free hook, releasing a pointer previously returned by
/// [`zlib_alloc`].
///
/// # Safety
///
/// `address` must be a pointer previously returned by [`zlib_alloc`], not
/// yet freed, and not null (zlib never calls `zfree` with a null address).
pub unsafe extern "C" fn zlib_free(_opaque: *mut c_void, address: *mut c_void) {
    if address.is_null() {
        return;
    }
    let base = unsafe { address.cast::<u8>().sub(HEADER_SIZE) };
    let header = unsafe { base.cast::<AllocationHeader>().read() };
    let layout = Layout::from_size_align(header.size, ALIGN)
        .expect("layout was valid at allocation time");
    unsafe { alloc::dealloc(base, layout) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_round_trips() {
        let mut cookie = ZlibCookie::new();
        let opaque = cookie.as_opaque();

        let ptr = unsafe { zlib_alloc(opaque, 16, 64) };
        assert!(!ptr.is_null());

        let bytes = ptr.cast::<u8>();
        unsafe {
            for i in 0..16 * 64 {
                bytes.add(i).write(0xAB);
            }
            for i in 0..16 * 64 {
                assert_eq!(bytes.add(i).read(), 0xAB);
            }
        }

        unsafe { zlib_free(opaque, ptr) };
    }

    #[test]
    fn alloc_rejects_overflowing_size() {
        let mut cookie = ZlibCookie::new();
        let opaque = cookie.as_opaque();
        let ptr = unsafe { zlib_alloc(opaque, u32::MAX, u32::MAX) };
        assert!(ptr.is_null());
    }

    #[test]
    fn free_ignores_null() {
        unsafe { zlib_free(ptr::null_mut(), ptr::null_mut()) };
    }
}
