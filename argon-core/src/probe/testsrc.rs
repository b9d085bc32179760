//! Synthetic test source entries

use std::collections::{BTreeSet, HashMap};

use ffmpeg_next::codec;
use tracing::debug;

use crate::capture::testsrc::{TEST_DIM, TEST_FRAMERATE, TEST_PIXFMT};
use crate::types::{
    FrameSpec, VideoFormatExt, VideoOrientation, VideoScale, VideoSourceKind, VideoSourceProps,
    VideoTrans,
};

/// Two entries: the plain pattern and a 16:9-letterboxed variant that
/// exercises the rotation filters.
pub(crate) fn detect_test_sources() -> HashMap<String, VideoSourceProps> {
    debug!("test video source detection started");

    let format = VideoFormatExt {
        codec: codec::Id::RAWVIDEO,
        pixfmt: TEST_PIXFMT,
        frame_specs: vec![FrameSpec {
            dim: TEST_DIM,
            framerates: BTreeSet::from([TEST_FRAMERATE]),
        }],
    };

    let mut map = HashMap::new();

    let plain = VideoSourceProps {
        kind: VideoSourceKind::Test,
        name: "test".to_string(),
        friendly_name: "Test".to_string(),
        orientation: TEST_DIM.orientation(),
        formats: vec![format.clone()],
        ..Default::default()
    };
    debug!("test source found: {}", plain.name);
    map.insert(plain.name.clone(), plain);

    let rotate = VideoSourceProps {
        kind: VideoSourceKind::Test,
        name: "test-rotate".to_string(),
        friendly_name: "Test, auto rotate".to_string(),
        orientation: VideoOrientation::Landscape,
        trans: VideoTrans::Frame169,
        scale: VideoScale::Off,
        formats: vec![format],
        ..Default::default()
    };
    debug!("test source found: {}", rotate.name);
    map.insert(rotate.name.clone(), rotate);

    debug!("test video source detection completed");
    map
}
