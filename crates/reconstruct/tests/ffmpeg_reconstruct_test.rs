//! Reconstruction against the real ffmpeg/ffprobe binaries
//!
//! Skipped (with a note) when ffmpeg is not installed.

use genmedia_common::{AudioTrack, Frame};
use genmedia_reconstruct::{decode_video, FfmpegCodec, MediaCodec, VideoReconstructor};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use tempfile::TempDir;

async fn codec_or_skip() -> Option<Arc<FfmpegCodec>> {
    let codec = FfmpegCodec::default();
    if codec.is_available().await {
        Some(Arc::new(codec))
    } else {
        eprintln!("Skipping: ffmpeg/ffprobe not found on PATH");
        None
    }
}

/// Frame whose brightness encodes its ordinal
fn shaded_frame(ordinal: u64) -> Frame {
    let level = (ordinal * 100) as u8;
    Frame::new(ordinal, RgbImage::from_pixel(64, 48, Rgb([level, level, level])))
}

fn tone(seconds: f64) -> AudioTrack {
    let rate = 16_000;
    let n = (seconds * f64::from(rate)) as usize;
    AudioTrack {
        sample_rate: rate,
        channels: 1,
        samples: (0..n).map(|i| ((i as f32) * 0.07).sin() * 0.3).collect(),
    }
}

#[tokio::test]
async fn test_three_frames_with_audio() {
    let Some(codec) = codec_or_skip().await else {
        return;
    };
    let workspace = TempDir::new().unwrap();

    let mut reconstructor = VideoReconstructor::new(codec.clone(), workspace.path()).unwrap();
    reconstructor
        .accumulate_all((0..3).map(shaded_frame))
        .unwrap();
    reconstructor.encode(25.0).await.unwrap();
    reconstructor.mux(&tone(0.12)).await.unwrap();
    let artifact = reconstructor.finalize().await.unwrap();

    let check_dir = TempDir::new().unwrap();
    let path = check_dir.path().join("out.mp4");
    std::fs::write(&path, artifact.bytes().unwrap()).unwrap();
    let probe = codec.probe(&path).await.unwrap();

    assert_eq!(probe.frame_count, 3);
    assert!(probe.has_audio);
    assert_eq!((probe.width, probe.height), (64, 48));
}

#[tokio::test]
async fn test_frame_order_survives_round_trip() {
    let Some(codec) = codec_or_skip().await else {
        return;
    };
    let workspace = TempDir::new().unwrap();

    let mut reconstructor = VideoReconstructor::new(codec.clone(), workspace.path()).unwrap();
    reconstructor
        .accumulate_all((0..3).map(shaded_frame))
        .unwrap();
    reconstructor.encode(10.0).await.unwrap();
    let artifact = reconstructor.finalize().await.unwrap();

    let (frames, fps) = decode_video(codec.as_ref(), artifact.bytes().unwrap(), workspace.path())
        .await
        .unwrap();
    assert_eq!(frames.len(), 3);
    assert!((fps - 10.0).abs() < 0.01);

    // Lossy codec: compare brightness ordering, not exact values
    let brightness: Vec<u8> = frames.iter().map(|f| f.image.get_pixel(32, 24)[0]).collect();
    assert!(brightness[0] < brightness[1] && brightness[1] < brightness[2]);

    // Scratch directories are gone
    assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
}
