//! v1 processors: deterministic SVG derivations from source bytes.
//!
//! Rendering engines are pluggable behind [`super::Processor`]; these
//! built-ins synthesize previews directly from the uploaded bytes so the
//! whole derivation pipeline runs without external backends.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Write as _;

use super::{Processor, ProcessorContext};
use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::events::DerivedOutput;
use crate::models::{Job, JobKind, ProgressStage};
use crate::queue::JobQueue;
use crate::storage::BlobStore;

/// Canvas size of model and texture-set thumbnails.
const THUMB_SIZE: u32 = 256;

/// Waveform canvas.
const WAVE_WIDTH: u32 = 512;
const WAVE_HEIGHT: u32 = 128;

/// Orbit frames rendered into the animated preview.
const ORBIT_FRAMES: usize = 8;

/// Vertices drawn per frame; larger meshes are subsampled.
const MAX_POINTS: usize = 400;

/// Renders orbit previews for a model version's primary blob.
pub struct ModelThumbnailProcessor;

#[async_trait]
impl Processor for ModelThumbnailProcessor {
    fn kind(&self) -> JobKind {
        JobKind::ModelThumbnail
    }

    async fn process(&self, ctx: &ProcessorContext, job: &Job) -> ApiResult<serde_json::Value> {
        ctx.queue
            .append_progress(job.id, ProgressStage::DownloadStarted, "fetching source blob")
            .await?;
        let source = ctx.blobs.get(&job.target_blob_hash).await?;

        let points = parse_obj_vertices(&source);
        ctx.queue
            .append_progress(
                job.id,
                ProgressStage::Loaded,
                &format!("loaded {} vertices", points.len()),
            )
            .await?;

        let frames: Vec<String> = (0..ORBIT_FRAMES)
            .map(|i| {
                let angle = i as f64 * std::f64::consts::TAU / ORBIT_FRAMES as f64;
                render_orbit_frame(&points, &job.target_blob_hash, angle)
            })
            .collect();
        ctx.queue
            .append_progress(
                job.id,
                ProgressStage::FramesRendered,
                &format!("rendered {} orbit frames", frames.len()),
            )
            .await?;

        let poster = svg_document(THUMB_SIZE, THUMB_SIZE, &frames[0]);
        let preview = svg_flipbook(THUMB_SIZE, THUMB_SIZE, &frames);
        ctx.queue
            .append_progress(job.id, ProgressStage::Encoded, "encoded poster and preview")
            .await?;

        let poster_stored = store_derived(ctx, poster.into_bytes()).await?;
        let preview_stored = store_derived(ctx, preview.into_bytes()).await?;
        ctx.queue
            .append_progress(job.id, ProgressStage::Uploaded, "uploaded derived blobs")
            .await?;

        let output = DerivedOutput {
            size_bytes: poster_stored.1,
            poster_hash: poster_stored.0,
            preview_hash: Some(preview_stored.0),
            width: THUMB_SIZE,
            height: THUMB_SIZE,
        };
        Ok(serde_json::to_value(output)
            .map_err(|e| ApiError::with_message(ErrorCode::FatalInternal, e.to_string()))?)
    }
}

/// Renders a peak waveform for a sound blob.
pub struct SoundWaveformProcessor;

#[async_trait]
impl Processor for SoundWaveformProcessor {
    fn kind(&self) -> JobKind {
        JobKind::SoundWaveform
    }

    async fn process(&self, ctx: &ProcessorContext, job: &Job) -> ApiResult<serde_json::Value> {
        ctx.queue
            .append_progress(job.id, ProgressStage::DownloadStarted, "fetching source blob")
            .await?;
        let source = ctx.blobs.get(&job.target_blob_hash).await?;

        let peaks = extract_peaks(&source, 64);
        ctx.queue
            .append_progress(
                job.id,
                ProgressStage::Loaded,
                &format!("computed {} peak buckets", peaks.len()),
            )
            .await?;

        let waveform = render_waveform(&peaks);
        ctx.queue
            .append_progress(job.id, ProgressStage::Encoded, "encoded waveform image")
            .await?;

        let stored = store_derived(ctx, waveform.into_bytes()).await?;
        ctx.queue
            .append_progress(job.id, ProgressStage::Uploaded, "uploaded waveform blob")
            .await?;

        let output = DerivedOutput {
            poster_hash: stored.0,
            preview_hash: None,
            width: WAVE_WIDTH,
            height: WAVE_HEIGHT,
            size_bytes: stored.1,
        };
        Ok(serde_json::to_value(output)
            .map_err(|e| ApiError::with_message(ErrorCode::FatalInternal, e.to_string()))?)
    }
}

/// Renders a tinted sphere preview for a texture set's albedo blob.
pub struct TextureSetThumbnailProcessor;

#[async_trait]
impl Processor for TextureSetThumbnailProcessor {
    fn kind(&self) -> JobKind {
        JobKind::TextureSetThumbnail
    }

    async fn process(&self, ctx: &ProcessorContext, job: &Job) -> ApiResult<serde_json::Value> {
        ctx.queue
            .append_progress(job.id, ProgressStage::DownloadStarted, "fetching source blob")
            .await?;
        let source = ctx.blobs.get(&job.target_blob_hash).await?;

        let (r, g, b) = average_tint(&source);
        let sphere = render_sphere(r, g, b);
        ctx.queue
            .append_progress(job.id, ProgressStage::Encoded, "encoded sphere preview")
            .await?;

        let stored = store_derived(ctx, sphere.into_bytes()).await?;
        ctx.queue
            .append_progress(job.id, ProgressStage::Uploaded, "uploaded preview blob")
            .await?;

        let output = DerivedOutput {
            poster_hash: stored.0,
            preview_hash: None,
            width: THUMB_SIZE,
            height: THUMB_SIZE,
            size_bytes: stored.1,
        };
        Ok(serde_json::to_value(output)
            .map_err(|e| ApiError::with_message(ErrorCode::FatalInternal, e.to_string()))?)
    }
}

/// Stub until a mesh-extraction backend is configured.
pub struct MeshAnalysisProcessor;

#[async_trait]
impl Processor for MeshAnalysisProcessor {
    fn kind(&self) -> JobKind {
        JobKind::MeshAnalysis
    }

    async fn process(&self, _ctx: &ProcessorContext, _job: &Job) -> ApiResult<serde_json::Value> {
        Err(ApiError::new(ErrorCode::NotAvailable))
    }
}

/// Stores a derived blob, enforcing the thumbnail size cap. The catalog
/// record is written by the completion hook once the queue accepts the
/// result, so remote workers need no catalog access. Returns `(hash, size)`.
async fn store_derived(ctx: &ProcessorContext, bytes: Vec<u8>) -> ApiResult<(String, u64)> {
    let size = bytes.len() as u64;
    if size > ctx.config.thumbnail_max_bytes {
        return Err(ApiError::with_message(
            ErrorCode::PayloadTooLarge,
            format!(
                "derived image of {} bytes exceeds the {} byte thumbnail cap",
                size, ctx.config.thumbnail_max_bytes
            ),
        ));
    }
    let put = ctx.blobs.put(Bytes::from(bytes)).await?;
    Ok((put.hash, size))
}

/// Extracts `v x y z` vertices from OBJ-style text. Falls back to a
/// hash-derived point cloud for non-OBJ sources so every model still gets
/// a deterministic preview.
fn parse_obj_vertices(source: &[u8]) -> Vec<(f64, f64, f64)> {
    let mut points = Vec::new();
    if let Ok(text) = std::str::from_utf8(source) {
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            if fields.next() != Some("v") {
                continue;
            }
            let coords: Vec<f64> = fields.take(3).filter_map(|f| f.parse().ok()).collect();
            if coords.len() == 3 {
                points.push((coords[0], coords[1], coords[2]));
            }
        }
    }
    if points.len() >= 3 {
        return points;
    }

    // Pseudo-geometry seeded by the content itself.
    source
        .chunks(3)
        .take(MAX_POINTS)
        .map(|chunk| {
            let x = chunk.first().copied().unwrap_or(0) as f64 / 255.0 - 0.5;
            let y = chunk.get(1).copied().unwrap_or(0) as f64 / 255.0 - 0.5;
            let z = chunk.get(2).copied().unwrap_or(0) as f64 / 255.0 - 0.5;
            (x, y, z)
        })
        .collect()
}

/// Projects the point cloud at an orbit angle and renders it as SVG dots.
fn render_orbit_frame(points: &[(f64, f64, f64)], seed: &str, angle: f64) -> String {
    if points.is_empty() {
        return String::new();
    }
    let (min, max) = points.iter().fold(
        ((f64::MAX, f64::MAX, f64::MAX), (f64::MIN, f64::MIN, f64::MIN)),
        |(lo, hi), p| {
            (
                (lo.0.min(p.0), lo.1.min(p.1), lo.2.min(p.2)),
                (hi.0.max(p.0), hi.1.max(p.1), hi.2.max(p.2)),
            )
        },
    );
    let extent = (max.0 - min.0)
        .max(max.1 - min.1)
        .max(max.2 - min.2)
        .max(f64::EPSILON);
    let center = (
        (min.0 + max.0) / 2.0,
        (min.1 + max.1) / 2.0,
        (min.2 + max.2) / 2.0,
    );
    let scale = THUMB_SIZE as f64 * 0.8 / extent;
    let half = THUMB_SIZE as f64 / 2.0;
    let stride = (points.len() / MAX_POINTS).max(1);

    let hue = seed.bytes().fold(0u32, |acc, b| acc.wrapping_add(b as u32)) % 360;
    let mut body = String::new();
    for point in points.iter().step_by(stride) {
        let x = point.0 - center.0;
        let y = point.1 - center.1;
        let z = point.2 - center.2;
        let rotated_x = x * angle.cos() + z * angle.sin();
        let px = half + rotated_x * scale;
        let py = half - y * scale;
        let _ = write!(
            body,
            r#"<circle cx="{:.1}" cy="{:.1}" r="1.4" fill="hsl({},70%,55%)"/>"#,
            px, py, hue
        );
    }
    body
}

/// Wraps frame content in a standalone SVG document.
fn svg_document(width: u32, height: u32, body: &str) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="#1e1e24"/>{body}</svg>"##,
        w = width,
        h = height,
        body = body
    )
}

/// Builds an SVG flipbook that cycles through the frames with opacity
/// animation.
fn svg_flipbook(width: u32, height: u32, frames: &[String]) -> String {
    let count = frames.len().max(1);
    let duration = count as f64 * 0.2;
    let mut body = String::new();
    for (i, frame) in frames.iter().enumerate() {
        let start = i as f64 / count as f64;
        let end = (i + 1) as f64 / count as f64;
        let _ = write!(
            body,
            r#"<g opacity="0"><animate attributeName="opacity" dur="{dur:.1}s" repeatCount="indefinite" calcMode="discrete" keyTimes="0;{start:.3};{end:.3};1" values="0;1;0;0"/>{frame}</g>"#,
            dur = duration,
            start = start,
            end = end,
            frame = frame
        );
    }
    svg_document(width, height, &body)
}

/// Bucketed peak extraction. WAV payloads are read as 16-bit little-endian
/// samples past the header; anything else is treated as raw 8-bit samples.
fn extract_peaks(source: &[u8], buckets: usize) -> Vec<f64> {
    let samples: Vec<f64> = if source.len() > 44 && source.starts_with(b"RIFF") {
        source[44..]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f64 / i16::MAX as f64)
            .collect()
    } else {
        source
            .iter()
            .map(|b| (*b as f64 - 128.0) / 128.0)
            .collect()
    };
    if samples.is_empty() {
        return vec![0.0; buckets];
    }

    let chunk = samples.len().div_ceil(buckets);
    samples
        .chunks(chunk)
        .map(|bucket| bucket.iter().fold(0.0f64, |acc, s| acc.max(s.abs())))
        .collect()
}

/// Renders peak buckets as a mirrored bar waveform.
fn render_waveform(peaks: &[f64]) -> String {
    let mid = WAVE_HEIGHT as f64 / 2.0;
    let bar_width = WAVE_WIDTH as f64 / peaks.len().max(1) as f64;
    let mut body = String::new();
    for (i, peak) in peaks.iter().enumerate() {
        let height = (peak * (mid - 2.0)).max(1.0);
        let _ = write!(
            body,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#4f9dde"/>"##,
            i as f64 * bar_width,
            mid - height,
            (bar_width - 1.0).max(0.5),
            height * 2.0
        );
    }
    svg_document(WAVE_WIDTH, WAVE_HEIGHT, &body)
}

/// Average byte tint used for the textured-sphere preview.
fn average_tint(source: &[u8]) -> (u8, u8, u8) {
    if source.is_empty() {
        return (128, 128, 128);
    }
    let mut sums = [0u64; 3];
    let mut counts = [0u64; 3];
    for (i, byte) in source.iter().enumerate() {
        sums[i % 3] += *byte as u64;
        counts[i % 3] += 1;
    }
    (
        (sums[0] / counts[0].max(1)) as u8,
        (sums[1] / counts[1].max(1)) as u8,
        (sums[2] / counts[2].max(1)) as u8,
    )
}

/// Renders a shaded sphere tinted with the set's dominant color.
fn render_sphere(r: u8, g: u8, b: u8) -> String {
    let body = format!(
        r#"<defs><radialGradient id="shade" cx="0.35" cy="0.35" r="0.8"><stop offset="0%" stop-color="rgb({lr},{lg},{lb})"/><stop offset="100%" stop-color="rgb({r},{g},{b})"/></radialGradient></defs><circle cx="128" cy="128" r="100" fill="url(#shade)"/>"#,
        lr = r.saturating_add(70),
        lg = g.saturating_add(70),
        lb = b.saturating_add(70),
        r = r,
        g = g,
        b = b
    );
    svg_document(THUMB_SIZE, THUMB_SIZE, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_vertices_are_parsed() {
        let obj = b"# cube\nv 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 2 3\n";
        let points = parse_obj_vertices(obj);
        assert_eq!(points.len(), 4);
        assert_eq!(points[1], (1.0, 0.0, 0.0));
    }

    #[test]
    fn non_obj_bytes_still_yield_points() {
        let points = parse_obj_vertices(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn peaks_are_bounded() {
        let peaks = extract_peaks(&[0, 255, 128, 10, 200, 90], 3);
        assert_eq!(peaks.len(), 3);
        assert!(peaks.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn flipbook_contains_every_frame() {
        let frames = vec!["<circle/>".to_string(); 4];
        let svg = svg_flipbook(64, 64, &frames);
        assert_eq!(svg.matches("<animate").count(), 4);
        assert!(svg.starts_with("<svg"));
    }
}
