//! Input demuxers
//!
//! Two flavors behind one wrapper: device demuxers (`video4linux2`,
//! `x11grab`) opened on a device path, and a probe-driven demuxer fed
//! by a pull callback (the compressed-camera ring).

use std::ffi::CString;
use std::ptr;

use ffmpeg_next::packet::Mut;
use ffmpeg_next::{ffi, Packet, Rational};
use tracing::debug;

use super::avio::{alloc_read_avio, av_err_str, free_avio, ReadFn};
use crate::error::{ArgonError, Result};

const PROBE_SIZE: i64 = 0x100000;
const MAX_ANALYZE_DURATION: i64 = 1_000_000;

pub(crate) struct InputContext {
    ctx: *mut ffi::AVFormatContext,
    read_cb: *mut ReadFn,
}

// SAFETY: used by one thread at a time; built on the caster thread and
// then owned by the muxing thread.
unsafe impl Send for InputContext {}

impl InputContext {
    /// Open a device demuxer (`video4linux2`, `x11grab`) with the given
    /// private options
    pub fn open_device(demuxer: &str, dev: &str, opts: &[(&str, String)]) -> Result<Self> {
        unsafe {
            let demuxer_name = CString::new(demuxer)
                .map_err(|_| ArgonError::av("invalid demuxer name"))?;
            let input_format = ffi::av_find_input_format(demuxer_name.as_ptr());
            if input_format.is_null() {
                return Err(ArgonError::av(format!(
                    "av_find_input_format error: {demuxer}"
                )));
            }

            let mut dict: *mut ffi::AVDictionary = ptr::null_mut();
            for (key, value) in opts {
                let Ok(k) = CString::new(*key) else { continue };
                let Ok(v) = CString::new(value.as_str()) else {
                    continue;
                };
                ffi::av_dict_set(&mut dict, k.as_ptr(), v.as_ptr(), 0);
            }

            let url = CString::new(dev).map_err(|_| ArgonError::av("invalid device path"))?;
            let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
            let ret = ffi::avformat_open_input(&mut ctx, url.as_ptr(), input_format, &mut dict);
            ffi::av_dict_free(&mut dict);
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "avformat_open_input for {dev} error: {}",
                    av_err_str(ret)
                )));
            }

            debug!("opened input device: {demuxer} {dev}");

            Ok(Self {
                ctx,
                read_cb: ptr::null_mut(),
            })
        }
    }

    /// Open a demuxer over a pull callback; the container is probed from
    /// the pushed bytes (Annex-B H.264 from the capture pipeline)
    pub fn open_pushed(read: ReadFn, framerate: i32) -> Result<Self> {
        unsafe {
            let ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(ArgonError::av("avformat_alloc_context error"));
            }

            let (pb, read_cb) = match alloc_read_avio(read) {
                Ok(v) => v,
                Err(e) => {
                    ffi::avformat_free_context(ctx);
                    return Err(e);
                }
            };

            (*ctx).pb = pb;
            (*ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO;
            (*ctx).probesize = PROBE_SIZE;
            (*ctx).max_analyze_duration = MAX_ANALYZE_DURATION;

            let mut dict: *mut ffi::AVDictionary = ptr::null_mut();
            let key = CString::new("framerate").expect("static key");
            let value = CString::new(framerate.to_string()).expect("framerate string");
            ffi::av_dict_set(&mut dict, key.as_ptr(), value.as_ptr(), 0);

            let empty = CString::new("").expect("empty cstring");
            let mut ctx_mut = ctx;
            let ret =
                ffi::avformat_open_input(&mut ctx_mut, empty.as_ptr(), ptr::null(), &mut dict);
            ffi::av_dict_free(&mut dict);
            if ret < 0 {
                // open_input frees the context on failure; the avio side
                // is still ours
                free_avio(pb, read_cb);
                return Err(ArgonError::av(format!(
                    "avformat_open_input for pushed video error: {}",
                    av_err_str(ret)
                )));
            }

            debug!("opened pushed video input");

            Ok(Self {
                ctx: ctx_mut,
                read_cb,
            })
        }
    }

    /// Probe streams and return the index of the best video stream
    pub fn find_best_video_stream(&mut self) -> Result<usize> {
        unsafe {
            let ret = ffi::avformat_find_stream_info(self.ctx, ptr::null_mut());
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "avformat_find_stream_info error: {}",
                    av_err_str(ret)
                )));
            }

            let idx = ffi::av_find_best_stream(
                self.ctx,
                ffi::AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                ptr::null_mut(),
                0,
            );
            if idx < 0 {
                return Err(ArgonError::av("no video stream found in input"));
            }

            Ok(idx as usize)
        }
    }

    /// Codec parameters of a stream; valid while the context lives
    pub fn stream_params(&self, stream_index: usize) -> *const ffi::AVCodecParameters {
        unsafe {
            let stream = *(*self.ctx).streams.add(stream_index);
            (*stream).codecpar
        }
    }

    pub fn stream_time_base(&self, stream_index: usize) -> Rational {
        unsafe {
            let stream = *(*self.ctx).streams.add(stream_index);
            Rational((*stream).time_base.num, (*stream).time_base.den)
        }
    }

    /// Reset the AVIO end-of-file latch.
    ///
    /// The pull callback signals EOF to interrupt a blocked read during
    /// a capture restart; the latch must be cleared before reads can
    /// resume on the rebuilt capture pipeline.
    pub fn clear_eof(&mut self) {
        unsafe {
            let pb = (*self.ctx).pb;
            if !pb.is_null() {
                (*pb).eof_reached = 0;
                (*pb).error = 0;
            }
        }
    }

    /// Read the next packet; `Ok(false)` on end of stream
    pub fn read_packet(&mut self, pkt: &mut Packet) -> Result<bool> {
        unsafe {
            let ret = ffi::av_read_frame(self.ctx, pkt.as_mut_ptr());
            if ret == ffi::AVERROR_EOF {
                return Ok(false);
            }
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "av_read_frame error: {}",
                    av_err_str(ret)
                )));
            }
            Ok(true)
        }
    }
}

impl Drop for InputContext {
    fn drop(&mut self) {
        unsafe {
            let pb = (*self.ctx).pb;
            let custom = !self.read_cb.is_null();
            ffi::avformat_close_input(&mut self.ctx);
            if custom {
                free_avio(pb, self.read_cb);
            }
        }
    }
}
