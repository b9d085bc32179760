//! Embedded web interface
//!
//! A single static page served on the root url-path. It reads the
//! control API for available sources and builds a stream URL from the
//! selected options.

pub const WEBUI_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Argon</title>
<style>
 body { font-family: sans-serif; max-width: 44rem; margin: 2rem auto; padding: 0 1rem; background: #111; color: #ddd; }
 h1 { font-size: 1.4rem; }
 label { display: block; margin-top: .8rem; }
 select, input { width: 100%; padding: .4rem; margin-top: .2rem; background: #222; color: #ddd; border: 1px solid #444; }
 button { margin-top: 1rem; padding: .5rem 1.2rem; background: #2a6; color: #fff; border: 0; cursor: pointer; }
 video, audio { width: 100%; margin-top: 1rem; background: #000; }
 #err { color: #e66; margin-top: 1rem; }
</style>
</head>
<body>
<h1>Argon</h1>
<div id="err"></div>
<label>Stream format
 <select id="format">
  <option value="mp4">mp4</option>
  <option value="mpegts">mpegts</option>
  <option value="mp3">mp3</option>
 </select>
</label>
<label>Video source <select id="video"></select></label>
<label>Audio source <select id="audio"></select></label>
<label>Video orientation
 <select id="orientation">
  <option value="auto">auto</option>
  <option value="landscape">landscape</option>
  <option value="inverted-landscape">inverted-landscape</option>
  <option value="portrait">portrait</option>
  <option value="inverted-portrait">inverted-portrait</option>
 </select>
</label>
<label>Audio volume <input id="volume" type="number" min="0" max="10" step="0.1" value="1"></label>
<button id="play">Play</button>
<div id="player"></div>
<script>
const base = window.location.pathname.replace(/\/$/, '');

function fillSelect(el, sources) {
  el.innerHTML = '<option value="off">off</option>';
  for (const s of sources) {
    const o = document.createElement('option');
    o.value = s.name;
    o.textContent = s.name + ' (' + s.friendly_name + ')';
    el.appendChild(o);
  }
}

fetch(base + '/ctrl/info')
  .then(r => r.json())
  .then(info => {
    fillSelect(document.getElementById('video'), info.video_sources);
    fillSelect(document.getElementById('audio'), info.audio_sources);
    if (info.default_video_source) document.getElementById('video').value = info.default_video_source;
    if (info.default_audio_source) document.getElementById('audio').value = info.default_audio_source;
    document.getElementById('format').value = info.default_stream_format;
    document.getElementById('orientation').value = info.default_video_orientation;
    document.getElementById('volume').value = info.default_audio_volume;
  })
  .catch(() => {
    document.getElementById('err').textContent = 'Control API is not available.';
  });

document.getElementById('play').addEventListener('click', () => {
  const format = document.getElementById('format').value;
  const params = new URLSearchParams({
    'stream-format': format,
    'video-source': document.getElementById('video').value,
    'audio-source': document.getElementById('audio').value,
    'video-orientation': document.getElementById('orientation').value,
    'audio-volume': document.getElementById('volume').value,
  });
  const url = base + '/stream?' + params.toString();
  const player = document.getElementById('player');
  const el = document.createElement(format === 'mp3' ? 'audio' : 'video');
  el.controls = true;
  el.autoplay = true;
  el.src = url;
  player.replaceChildren(el);
});
</script>
</body>
</html>
"#;
