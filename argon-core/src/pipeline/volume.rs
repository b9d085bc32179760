//! Per-sample gain with clamping
//!
//! Applied in place to raw PCM frames before they enter the audio
//! decoder. Covers the sample layouts PulseAudio capture produces:
//! 1-byte unsigned and 2/4-byte signed in either byte order. Gain above
//! 1.0 clips at the format limits instead of wrapping.

use crate::types::Endianness;

/// Scale every sample in `data` by `gain`
pub(crate) fn apply_gain(data: &mut [u8], bps: u32, endian: Endianness, gain: f32) {
    match (bps, endian) {
        (1, _) => scale_u8(data, gain),
        (2, Endianness::Le) => scale_i16::<true>(data, gain),
        (2, Endianness::Be) => scale_i16::<false>(data, gain),
        (4, Endianness::Le) => scale_i32::<true>(data, gain),
        (4, Endianness::Be) => scale_i32::<false>(data, gain),
        // 3-byte formats pass through unscaled
        _ => {}
    }
}

fn scale_u8(data: &mut [u8], gain: f32) {
    for b in data.iter_mut() {
        // unsigned samples are centered on 128
        let centered = f32::from(*b) - 128.0;
        let scaled = (centered * gain).clamp(-128.0, 127.0);
        *b = (scaled + 128.0) as u8;
    }
}

fn scale_i16<const LE: bool>(data: &mut [u8], gain: f32) {
    for chunk in data.chunks_exact_mut(2) {
        let bytes = [chunk[0], chunk[1]];
        let v = if LE {
            i16::from_le_bytes(bytes)
        } else {
            i16::from_be_bytes(bytes)
        };
        let scaled = (f32::from(v) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        let out = if LE {
            scaled.to_le_bytes()
        } else {
            scaled.to_be_bytes()
        };
        chunk.copy_from_slice(&out);
    }
}

fn scale_i32<const LE: bool>(data: &mut [u8], gain: f32) {
    for chunk in data.chunks_exact_mut(4) {
        let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let v = if LE {
            i32::from_le_bytes(bytes)
        } else {
            i32::from_be_bytes(bytes)
        };
        let scaled = (v as f64 * f64::from(gain)).clamp(f64::from(i32::MIN), f64::from(i32::MAX));
        let out = if LE {
            (scaled as i32).to_le_bytes()
        } else {
            (scaled as i32).to_be_bytes()
        };
        chunk.copy_from_slice(&out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_gain_and_clip() {
        let mut data = [128u8, 192, 64];
        apply_gain(&mut data, 1, Endianness::Le, 2.0);
        assert_eq!(data[0], 128); // silence stays silent
        assert_eq!(data[1], 255); // 64 above center doubled clips
        assert_eq!(data[2], 0); // 64 below center doubled clips
    }

    #[test]
    fn test_i16_le_gain() {
        let mut data = 1000i16.to_le_bytes().to_vec();
        apply_gain(&mut data, 2, Endianness::Le, 2.5);
        assert_eq!(i16::from_le_bytes([data[0], data[1]]), 2500);
    }

    #[test]
    fn test_i16_be_clips_not_wraps() {
        let mut data = 30_000i16.to_be_bytes().to_vec();
        apply_gain(&mut data, 2, Endianness::Be, 10.0);
        assert_eq!(i16::from_be_bytes([data[0], data[1]]), i16::MAX);

        let mut data = (-30_000i16).to_be_bytes().to_vec();
        apply_gain(&mut data, 2, Endianness::Be, 10.0);
        assert_eq!(i16::from_be_bytes([data[0], data[1]]), i16::MIN);
    }

    #[test]
    fn test_i32_le_gain() {
        let mut data = 1_000_000i32.to_le_bytes().to_vec();
        apply_gain(&mut data, 4, Endianness::Le, 0.5);
        let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        assert_eq!(v, 500_000);
    }

    #[test]
    fn test_i32_clips() {
        let mut data = i32::MAX.to_le_bytes().to_vec();
        apply_gain(&mut data, 4, Endianness::Le, 10.0);
        let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        assert_eq!(v, i32::MAX);
    }

    #[test]
    fn test_zero_gain_silences() {
        let mut data = 12345i16.to_le_bytes().to_vec();
        apply_gain(&mut data, 2, Endianness::Le, 0.0);
        assert_eq!(i16::from_le_bytes([data[0], data[1]]), 0);
    }
}
