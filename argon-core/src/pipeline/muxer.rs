//! Output muxer with a push callback
//!
//! Wraps an `AVFormatContext` whose AVIO writes into a caller-supplied
//! callback (the HTTP push path). Fragmented MP4 flushes a fragment
//! after every written frame so downstream readers see bytes promptly.
//!
//! rust-ffmpeg has no safe surface for output contexts over custom IO,
//! so this module talks to the FFI directly; every unsafe block touches
//! only pointers this struct owns.

use std::ffi::CString;
use std::ptr;

use ffmpeg_next::packet::Mut;
use ffmpeg_next::{encoder, ffi, Rational};
use tracing::{debug, warn};

use super::avio::{alloc_write_avio, av_err_str, free_avio, WriteFn};
use crate::error::{ArgonError, Result};
use crate::types::StreamFormat;

pub(crate) struct Muxer {
    ctx: *mut ffi::AVFormatContext,
    write_cb: *mut WriteFn,
    format: StreamFormat,
    header_written: bool,
}

// SAFETY: the muxer is used by exactly one thread at a time (built on
// the caster thread, then moved into the muxing thread).
unsafe impl Send for Muxer {}

impl Muxer {
    pub fn new(format: StreamFormat, write: WriteFn) -> Result<Self> {
        debug!("using muxer: {format}");

        unsafe {
            let name = CString::new(format.muxer_name()).expect("static muxer name");
            let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
            let ret = ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                name.as_ptr(),
                ptr::null(),
            );
            if ret < 0 || ctx.is_null() {
                return Err(ArgonError::av(format!(
                    "avformat_alloc_output_context2 error: {}",
                    av_err_str(ret)
                )));
            }

            let (pb, write_cb) = match alloc_write_avio(write) {
                Ok(v) => v,
                Err(e) => {
                    ffi::avformat_free_context(ctx);
                    return Err(e);
                }
            };

            (*ctx).pb = pb;
            (*ctx).flags |= ffi::AVFMT_FLAG_NOBUFFER
                | ffi::AVFMT_FLAG_FLUSH_PACKETS
                | ffi::AVFMT_FLAG_CUSTOM_IO
                | ffi::AVFMT_FLAG_AUTO_BSF;

            Ok(Self {
                ctx,
                write_cb,
                format,
                header_written: false,
            })
        }
    }

    fn new_stream(&mut self, id: i32) -> Result<*mut ffi::AVStream> {
        unsafe {
            let stream = ffi::avformat_new_stream(self.ctx, ptr::null());
            if stream.is_null() {
                return Err(ArgonError::av("avformat_new_stream error"));
            }
            (*stream).id = id;
            Ok(stream)
        }
    }

    /// Add a video stream configured from an opened encoder
    pub fn add_video_stream_from_encoder(
        &mut self,
        enc: &encoder::Video,
        framerate: i32,
    ) -> Result<usize> {
        unsafe {
            let stream = self.new_stream(0)?;
            (*stream).r_frame_rate = ffi::AVRational {
                num: framerate,
                den: 1,
            };
            (*stream).time_base = ffi::AVRational {
                num: 1,
                den: framerate,
            };
            let ret = ffi::avcodec_parameters_from_context((*stream).codecpar, enc.as_ptr());
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "avcodec_parameters_from_context for video error: {}",
                    av_err_str(ret)
                )));
            }
            Ok(((*self.ctx).nb_streams - 1) as usize)
        }
    }

    /// Add a passthrough video stream by copying demuxer parameters
    ///
    /// SAFETY: `params` must point at valid codec parameters for the
    /// duration of the call.
    pub unsafe fn add_video_stream_from_params(
        &mut self,
        params: *const ffi::AVCodecParameters,
        framerate: i32,
    ) -> Result<usize> {
        let stream = self.new_stream(0)?;
        (*stream).time_base = ffi::AVRational {
            num: 1,
            den: framerate,
        };
        let ret = ffi::avcodec_parameters_copy((*stream).codecpar, params);
        if ret < 0 {
            return Err(ArgonError::av(format!(
                "avcodec_parameters_copy for video error: {}",
                av_err_str(ret)
            )));
        }
        Ok(((*self.ctx).nb_streams - 1) as usize)
    }

    /// Add an audio stream configured from an opened encoder
    pub fn add_audio_stream_from_encoder(&mut self, enc: &encoder::Audio) -> Result<usize> {
        unsafe {
            let stream = self.new_stream(1)?;
            let ret = ffi::avcodec_parameters_from_context((*stream).codecpar, enc.as_ptr());
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "avcodec_parameters_from_context for audio error: {}",
                    av_err_str(ret)
                )));
            }
            Ok(((*self.ctx).nb_streams - 1) as usize)
        }
    }

    /// Attach a display-matrix rotation to a stream. This is the only
    /// mechanism used to convey rotation; frames are never rotated.
    pub fn set_stream_rotation(&mut self, stream_index: usize, rotation: i32) -> Result<()> {
        if rotation == 0 {
            return Ok(());
        }

        unsafe {
            let stream = *(*self.ctx).streams.add(stream_index);
            let par = (*stream).codecpar;
            let side_data = ffi::av_packet_side_data_new(
                &mut (*par).coded_side_data,
                &mut (*par).nb_coded_side_data,
                ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
                9 * std::mem::size_of::<i32>(),
                0,
            );
            if side_data.is_null() {
                return Err(ArgonError::av("av_packet_side_data_new error"));
            }

            let matrix = (*side_data).data as *mut i32;
            write_rotation_matrix(std::slice::from_raw_parts_mut(matrix, 9), rotation);
        }

        Ok(())
    }

    /// Per-format stream metadata (author/title or service fields)
    pub fn set_metadata(&mut self, author: &str, title: &str) {
        let (author_key, title_key) = match self.format {
            StreamFormat::MpegTs => ("service_provider", "service_name"),
            StreamFormat::Mp4 | StreamFormat::Mp3 => ("author", "title"),
        };

        unsafe {
            dict_set(&mut (*self.ctx).metadata, author_key, author);
            dict_set(&mut (*self.ctx).metadata, title_key, title);
        }
    }

    /// Write the container header with the per-format muxer options
    pub fn write_header(&mut self) -> Result<()> {
        unsafe {
            let mut opts: *mut ffi::AVDictionary = ptr::null_mut();
            match self.format {
                StreamFormat::Mp4 => {
                    dict_set(&mut opts, "movflags", "frag_custom+empty_moov+delay_moov");
                }
                StreamFormat::MpegTs => {
                    dict_set(&mut opts, "mpegts_m2ts_mode", "-1");
                }
                StreamFormat::Mp3 => {}
            }

            let ret = ffi::avformat_write_header(self.ctx, &mut opts);
            log_rejected_opts(opts);
            ffi::av_dict_free(&mut opts);

            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "avformat_write_header error: {}",
                    av_err_str(ret)
                )));
            }
        }

        self.header_written = true;
        Ok(())
    }

    /// Current time base of a stream (the muxer may adjust it while
    /// writing the header)
    pub fn stream_time_base(&self, stream_index: usize) -> Rational {
        unsafe {
            let stream = *(*self.ctx).streams.add(stream_index);
            Rational((*stream).time_base.num, (*stream).time_base.den)
        }
    }

    /// Submit one packet; the packet is consumed (unreferenced)
    pub fn write_packet(&mut self, pkt: &mut ffmpeg_next::Packet) -> Result<()> {
        unsafe {
            let ret = ffi::av_write_frame(self.ctx, pkt.as_mut_ptr());
            ffi::av_packet_unref(pkt.as_mut_ptr());
            if ret < 0 {
                return Err(ArgonError::av(format!(
                    "av_write_frame error: {}",
                    av_err_str(ret)
                )));
            }
        }
        Ok(())
    }

    /// Force the muxer to emit the buffered fragment
    pub fn flush_fragment(&mut self) {
        unsafe {
            ffi::av_write_frame(self.ctx, ptr::null_mut());
        }
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        unsafe {
            let pb = (*self.ctx).pb;
            (*self.ctx).pb = ptr::null_mut();
            ffi::avformat_free_context(self.ctx);
            free_avio(pb, self.write_cb);
        }
    }
}

/// Fixed-point display matrix for a counter-clockwise rotation
fn write_rotation_matrix(matrix: &mut [i32], rotation: i32) {
    let radians = -f64::from(rotation) * std::f64::consts::PI / 180.0;
    let c = (radians.cos() * f64::from(1 << 16)) as i32;
    let s = (radians.sin() * f64::from(1 << 16)) as i32;

    matrix.fill(0);
    matrix[0] = c;
    matrix[1] = -s;
    matrix[3] = s;
    matrix[4] = c;
    matrix[8] = 1 << 30;
}

unsafe fn dict_set(dict: *mut *mut ffi::AVDictionary, key: &str, value: &str) {
    let Ok(key) = CString::new(key) else { return };
    let Ok(value) = CString::new(value) else {
        return;
    };
    ffi::av_dict_set(dict, key.as_ptr(), value.as_ptr(), 0);
}

unsafe fn log_rejected_opts(opts: *mut ffi::AVDictionary) {
    let mut entry: *mut ffi::AVDictionaryEntry = ptr::null_mut();
    let empty = CString::new("").expect("empty cstring");
    loop {
        entry = ffi::av_dict_get(opts, empty.as_ptr(), entry, ffi::AV_DICT_IGNORE_SUFFIX);
        if entry.is_null() {
            break;
        }
        let key = std::ffi::CStr::from_ptr((*entry).key).to_string_lossy();
        let value = std::ffi::CStr::from_ptr((*entry).value).to_string_lossy();
        warn!("rejected av option: {key}={value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_matrix_90() {
        let mut m = [0i32; 9];
        write_rotation_matrix(&mut m, 90);
        assert_eq!(m[0], 0);
        assert_eq!(m[1], 1 << 16);
        assert_eq!(m[3], -(1 << 16));
        assert_eq!(m[4], 0);
        assert_eq!(m[8], 1 << 30);
    }

    #[test]
    fn test_rotation_matrix_180() {
        let mut m = [0i32; 9];
        write_rotation_matrix(&mut m, 180);
        assert_eq!(m[0], -(1 << 16));
        assert_eq!(m[4], -(1 << 16));
        assert_eq!(m[1], 0);
        assert_eq!(m[3], 0);
    }
}
