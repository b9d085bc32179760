//! Custom AVIO contexts
//!
//! rust-ffmpeg does not wrap `avio_alloc_context`, so the byte taps the
//! pipeline needs — muxed output into the HTTP push path, pushed H.264
//! into a demuxer — are built on the raw FFI with typed boxed callbacks
//! as the opaque payload. No raw back-pointers: the callback environment
//! owns everything it touches.

use std::ffi::c_void;
use std::os::raw::c_int;

use ffmpeg_next::ffi;

use crate::error::{ArgonError, Result};

pub(crate) const AVIO_BUF_SIZE: usize = 0x40000;

/// Pull callback: fill the destination, return the byte count, 0 for
/// "try again" or a negative AVERROR (EOF on terminate/restart)
pub(crate) type ReadFn = Box<dyn FnMut(&mut [u8]) -> i32 + Send>;

/// Push callback: consume the muxed bytes, return the count consumed
pub(crate) type WriteFn = Box<dyn FnMut(&[u8]) -> i32 + Send>;

unsafe extern "C" fn read_trampoline(opaque: *mut c_void, buf: *mut u8, size: c_int) -> c_int {
    if size < 0 {
        return ffi::AVERROR_UNKNOWN;
    }
    let cb = &mut *(opaque as *mut ReadFn);
    let slice = std::slice::from_raw_parts_mut(buf, size as usize);
    cb(slice)
}

unsafe extern "C" fn write_trampoline(opaque: *mut c_void, buf: *const u8, size: c_int) -> c_int {
    if size < 0 {
        return ffi::AVERROR_UNKNOWN;
    }
    let cb = &mut *(opaque as *mut WriteFn);
    let slice = std::slice::from_raw_parts(buf, size as usize);
    cb(slice)
}

/// Allocate an AVIO context around a boxed callback.
///
/// Returns the context and the raw callback pointer; the caller frees
/// both through [`free_avio`] after the owning format context is done
/// with them.
///
/// SAFETY: the callback box outlives the AVIO context because both are
/// stored together and freed together in `free_avio`.
pub(crate) fn alloc_read_avio(cb: ReadFn) -> Result<(*mut ffi::AVIOContext, *mut ReadFn)> {
    unsafe {
        let buf = ffi::av_malloc(AVIO_BUF_SIZE) as *mut u8;
        if buf.is_null() {
            return Err(ArgonError::av("unable to allocate avio buffer"));
        }

        let cb = Box::into_raw(Box::new(cb));
        let ctx = ffi::avio_alloc_context(
            buf,
            AVIO_BUF_SIZE as c_int,
            0,
            cb as *mut c_void,
            Some(read_trampoline),
            None,
            None,
        );
        if ctx.is_null() {
            ffi::av_free(buf as *mut c_void);
            drop(Box::from_raw(cb));
            return Err(ArgonError::av("avio_alloc_context error"));
        }

        Ok((ctx, cb))
    }
}

/// As [`alloc_read_avio`] for the write direction
pub(crate) fn alloc_write_avio(cb: WriteFn) -> Result<(*mut ffi::AVIOContext, *mut WriteFn)> {
    unsafe {
        let buf = ffi::av_malloc(AVIO_BUF_SIZE) as *mut u8;
        if buf.is_null() {
            return Err(ArgonError::av("unable to allocate avio buffer"));
        }

        let cb = Box::into_raw(Box::new(cb));
        let ctx = ffi::avio_alloc_context(
            buf,
            AVIO_BUF_SIZE as c_int,
            1,
            cb as *mut c_void,
            None,
            Some(write_trampoline),
            None,
        );
        if ctx.is_null() {
            ffi::av_free(buf as *mut c_void);
            drop(Box::from_raw(cb));
            return Err(ArgonError::av("avio_alloc_context error"));
        }

        Ok((ctx, cb))
    }
}

/// Free an AVIO context and its callback box.
///
/// SAFETY: must be called exactly once, after the format context using
/// the AVIO context has been closed or detached from it.
pub(crate) unsafe fn free_avio<F>(ctx: *mut ffi::AVIOContext, cb: *mut F) {
    if !ctx.is_null() {
        if !(*ctx).buffer.is_null() {
            ffi::av_freep(&mut (*ctx).buffer as *mut _ as *mut c_void);
        }
        let mut ctx = ctx;
        ffi::avio_context_free(&mut ctx);
    }
    if !cb.is_null() {
        drop(Box::from_raw(cb));
    }
}

/// Map an FFmpeg error code to a printable string
pub(crate) fn av_err_str(err: c_int) -> String {
    let mut buf = [0i8; ffi::AV_ERROR_MAX_STRING_SIZE as usize];
    unsafe {
        if ffi::av_strerror(err, buf.as_mut_ptr() as *mut _, buf.len()) < 0 {
            return err.to_string();
        }
        std::ffi::CStr::from_ptr(buf.as_ptr() as *const _)
            .to_string_lossy()
            .into_owned()
    }
}
