//! PulseAudio source enumeration

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ffmpeg_next::codec;
use libpulse_binding as pulse;
use pulse::context::{Context, FlagSet, State};
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::sample::Format;
use tracing::{debug, warn};

use crate::error::{ArgonError, Result};
use crate::types::{short_hash, AudioSourceKind, AudioSourceProps, Endianness};

/// Map a PulseAudio sample format to its PCM codec, bytes per sample and
/// byte order. `None` for formats FFmpeg has no PCM decoder for.
pub(crate) fn pa_format_codec(format: Format) -> Option<(codec::Id, u32, Endianness)> {
    match format {
        Format::U8 => Some((codec::Id::PCM_U8, 1, Endianness::Le)),
        Format::ALaw => Some((codec::Id::PCM_ALAW, 1, Endianness::Le)),
        Format::ULaw => Some((codec::Id::PCM_MULAW, 1, Endianness::Le)),
        Format::S16le => Some((codec::Id::PCM_S16LE, 2, Endianness::Le)),
        Format::S16be => Some((codec::Id::PCM_S16BE, 2, Endianness::Be)),
        Format::S32le => Some((codec::Id::PCM_S32LE, 4, Endianness::Le)),
        Format::S32be => Some((codec::Id::PCM_S32BE, 4, Endianness::Be)),
        Format::F32le => Some((codec::Id::PCM_F32LE, 4, Endianness::Le)),
        Format::F32be => Some((codec::Id::PCM_F32BE, 4, Endianness::Be)),
        Format::S24le => Some((codec::Id::PCM_S24LE, 3, Endianness::Le)),
        Format::S24be => Some((codec::Id::PCM_S24BE, 3, Endianness::Be)),
        _ => None,
    }
}

/// Inverse of [`pa_format_codec`], used when opening record streams
pub(crate) fn codec_pa_format(codec_id: codec::Id) -> Option<Format> {
    match codec_id {
        codec::Id::PCM_U8 => Some(Format::U8),
        codec::Id::PCM_ALAW => Some(Format::ALaw),
        codec::Id::PCM_MULAW => Some(Format::ULaw),
        codec::Id::PCM_S16LE => Some(Format::S16le),
        codec::Id::PCM_S16BE => Some(Format::S16be),
        codec::Id::PCM_S32LE => Some(Format::S32le),
        codec::Id::PCM_S32BE => Some(Format::S32be),
        codec::Id::PCM_F32LE => Some(Format::F32le),
        codec::Id::PCM_F32BE => Some(Format::F32be),
        codec::Id::PCM_S24LE => Some(Format::S24le),
        codec::Id::PCM_S24BE => Some(Format::S24be),
        _ => None,
    }
}

/// Iterate a standard mainloop until the context is ready
pub(crate) fn iterate_until_ready(ml: &mut Mainloop, ctx: &Context) -> Result<()> {
    loop {
        match ml.iterate(false) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(_) | IterateResult::Err(_) => {
                return Err(ArgonError::pulse("mainloop iterate error"));
            }
        }
        match ctx.get_state() {
            State::Ready => return Ok(()),
            State::Failed | State::Terminated => {
                return Err(ArgonError::pulse("context connection failed"));
            }
            _ => {}
        }
    }
}

/// Enumerate recordable PulseAudio sources. Sources that are neither
/// sink monitors nor have an active port are skipped. Two virtual
/// playback-follow entries are always present.
pub(crate) fn detect_pa_sources() -> Result<HashMap<String, AudioSourceProps>> {
    debug!("pa source detection started");

    let mut ml =
        Mainloop::new().ok_or_else(|| ArgonError::pulse("failed to create mainloop"))?;
    let mut ctx = Context::new(&ml, "argon")
        .ok_or_else(|| ArgonError::pulse("failed to create context"))?;

    ctx.connect(None, FlagSet::NOFLAGS, None)?;
    iterate_until_ready(&mut ml, &ctx)?;

    let found: Rc<RefCell<Vec<AudioSourceProps>>> = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(RefCell::new(false));

    {
        let found = found.clone();
        let done = done.clone();
        ctx.introspect().get_source_info_list(move |res| {
            use pulse::callbacks::ListResult;
            match res {
                ListResult::Item(info) => {
                    let monitor = info.monitor_of_sink.is_some();
                    if !monitor && info.active_port.is_none() {
                        // not a monitor and nothing plugged in
                        return;
                    }

                    let dev = info
                        .name
                        .as_ref()
                        .map(|n| n.to_string())
                        .unwrap_or_default();
                    let Some((codec_id, bps, endian)) =
                        pa_format_codec(info.sample_spec.format)
                    else {
                        warn!("unsupported sample format: {dev}");
                        return;
                    };

                    let props = AudioSourceProps {
                        kind: if monitor {
                            AudioSourceKind::Monitor
                        } else {
                            AudioSourceKind::Mic
                        },
                        name: if monitor {
                            format!("monitor-{:03}", short_hash(&dev))
                        } else {
                            format!("mic-{:03}", short_hash(&dev))
                        },
                        friendly_name: info
                            .description
                            .as_ref()
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| dev.clone()),
                        dev,
                        codec: codec_id,
                        channels: info.sample_spec.channels,
                        rate: info.sample_spec.rate,
                        bps,
                        endian,
                        mute_source: false,
                    };

                    debug!("pa source found: {} ({})", props.name, props.friendly_name);
                    found.borrow_mut().push(props);
                }
                ListResult::End | ListResult::Error => *done.borrow_mut() = true,
            }
        });
    }

    while !*done.borrow() {
        match ml.iterate(false) {
            IterateResult::Success(_) => {}
            IterateResult::Quit(_) | IterateResult::Err(_) => break,
        }
    }

    ctx.disconnect();

    let mut map: HashMap<String, AudioSourceProps> = HashMap::new();
    for props in found.borrow_mut().drain(..) {
        map.entry(props.name.clone()).or_insert(props);
    }

    for (name, friendly, mute) in [
        ("playback", "Playback capture", false),
        ("playback-mute", "Playback capture, mute source", true),
    ] {
        let props = AudioSourceProps {
            kind: AudioSourceKind::Playback,
            name: name.to_string(),
            friendly_name: friendly.to_string(),
            dev: String::new(),
            codec: codec::Id::PCM_S16LE,
            channels: 2,
            rate: 44100,
            bps: 2,
            endian: Endianness::Le,
            mute_source: mute,
        };
        debug!("pa source found: {}", props.name);
        map.entry(props.name.clone()).or_insert(props);
    }

    debug!("pa source detection completed");
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        for f in [
            Format::U8,
            Format::S16le,
            Format::S16be,
            Format::S32le,
            Format::F32le,
        ] {
            let (codec_id, _, _) = pa_format_codec(f).unwrap();
            assert_eq!(codec_pa_format(codec_id), Some(f));
        }
    }

    #[test]
    fn test_bps_matches_format() {
        assert_eq!(pa_format_codec(Format::S16le).unwrap().1, 2);
        assert_eq!(pa_format_codec(Format::S32be).unwrap().1, 4);
        assert_eq!(pa_format_codec(Format::U8).unwrap().1, 1);
    }
}
