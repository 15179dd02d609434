//! Duration probing for cached media files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use log::debug;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

fn open_symphonia_probe(path: &Path) -> Result<symphonia::core::probe::ProbeResult, String> {
    let file = File::open(path)
        .map_err(|error| format!("failed to open {}: {}", path.display(), error))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|error| format!("unrecognized media in {}: {}", path.display(), error))
}

/// Playable length of the first decodable track.
pub fn probe_duration(path: &Path) -> Result<Duration, String> {
    let probed = open_symphonia_probe(path)?;
    let format = probed.format;
    let track = format
        .default_track()
        .filter(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        })
        .ok_or_else(|| format!("no playable track in {}", path.display()))?;

    let params = &track.codec_params;
    let frames = params
        .n_frames
        .ok_or_else(|| format!("track length unknown in {}", path.display()))?;
    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(frames);
        return Ok(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac));
    }
    match params.sample_rate {
        Some(rate) if rate > 0 => Ok(Duration::from_secs_f64(frames as f64 / f64::from(rate))),
        _ => Err(format!("no time base for {}", path.display())),
    }
}

/// Probes on a helper thread so the caller's tick never waits on disk.
pub fn spawn_duration_probe(path: PathBuf) -> Receiver<Result<Duration, String>> {
    let (sender, receiver) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name("media-probe".to_string())
        .spawn(move || {
            let result = probe_duration(&path);
            debug!("MediaProbe: {} -> {:?}", path.display(), result);
            let _ = sender.send(result);
        });
    if let Err(error) = spawned {
        let (fallback_sender, fallback_receiver) = mpsc::sync_channel(1);
        let _ = fallback_sender.send(Err(format!("failed to start probe thread: {error}")));
        return fallback_receiver;
    }
    receiver
}
