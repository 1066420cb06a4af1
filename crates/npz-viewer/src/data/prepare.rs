//! CPU-side scene preparation: chunking, random downsampling, colour assignment and bounds.
//!
//! Nothing here touches the GPU, so every step is unit-testable.

use indicatif::{ProgressBar, ProgressStyle};
use pcnpz::{LoadedCloud, Point};
use rand::seq::index;
use rand::Rng;
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Per-source colours, assigned in source order and reused cyclically.
pub const PALETTE: [[f32; 3]; 6] = [
    [1.0, 0.0, 0.0], // red
    [0.0, 1.0, 0.0], // green
    [0.0, 0.0, 1.0], // blue
    [1.0, 1.0, 0.0], // yellow
    [1.0, 0.0, 1.0], // magenta
    [0.0, 1.0, 1.0], // cyan
];

#[inline]
pub fn palette_color(source_index: usize) -> [f32; 3] {
    PALETTE[source_index % PALETTE.len()]
}

/// Contiguous slices of at most `chunk_size` points covering `points` exactly once, in order.
#[inline]
pub fn chunk(points: &[Point], chunk_size: NonZeroUsize) -> std::slice::Chunks<'_, Point> {
    points.chunks(chunk_size.get())
}

/// Result of [`downsample`]. Borrows the input when nothing had to be dropped.
#[derive(Debug, Clone)]
pub struct Downsampled<'a> {
    pub points: Cow<'a, [Point]>,
    pub original: usize,
    pub kept: usize,
}

/// Keeps at most `target` points, drawn uniformly without replacement.
pub fn downsample<'a, R: Rng + ?Sized>(
    points: &'a [Point],
    target: usize,
    rng: &mut R,
) -> Downsampled<'a> {
    let original = points.len();
    if original <= target {
        return Downsampled {
            points: Cow::Borrowed(points),
            original,
            kept: original,
        };
    }

    let picked: Vec<Point> = index::sample(rng, original, target)
        .into_iter()
        .map(|i| points[i])
        .collect();

    Downsampled {
        points: Cow::Owned(picked),
        original,
        kept: target,
    }
}

/// Running totals of points before and after downsampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownsampleStats {
    pub original: usize,
    pub kept: usize,
}

impl DownsampleStats {
    /// `kept / original` in percent; zero for an empty scene.
    pub fn ratio_percent(&self) -> f64 {
        if self.original == 0 {
            0.0
        } else {
            self.kept as f64 / self.original as f64 * 100.0
        }
    }
}

impl std::ops::AddAssign for DownsampleStats {
    fn add_assign(&mut self, rhs: Self) {
        self.original += rhs.original;
        self.kept += rhs.kept;
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn of(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let (min, max) = points
            .par_iter()
            .map(|p| (*p, *p))
            .reduce(
                || ([f32::INFINITY; 3], [f32::NEG_INFINITY; 3]),
                |(a_min, a_max), (b_min, b_max)| {
                    (
                        [
                            a_min[0].min(b_min[0]),
                            a_min[1].min(b_min[1]),
                            a_min[2].min(b_min[2]),
                        ],
                        [
                            a_max[0].max(b_max[0]),
                            a_max[1].max(b_max[1]),
                            a_max[2].max(b_max[2]),
                        ],
                    )
                },
            );

        Some(Self { min, max })
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    #[inline]
    pub fn extent(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    /// Largest side length.
    pub fn max_extent(&self) -> f32 {
        let e = self.extent();
        e[0].max(e[1]).max(e[2])
    }

    /// Length of the diagonal.
    pub fn diameter(&self) -> f32 {
        let e = self.extent();
        (e[0] * e[0] + e[1] * e[1] + e[2] * e[2]).sqrt()
    }
}

/// One render batch: a downsampled chunk of one source, drawn in one colour.
#[derive(Debug, Clone)]
pub struct PreparedChunk {
    pub source: usize,
    pub color: [f32; 3],
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub name: String,
    pub color: [f32; 3],
    pub stats: DownsampleStats,
}

#[derive(Debug, Clone)]
pub struct Scene {
    pub sources: Vec<SourceSummary>,
    pub chunks: Vec<PreparedChunk>,
    pub stats: DownsampleStats,
    /// Bounds of the points that will actually be drawn.
    pub bounds: Option<Aabb>,
}

#[derive(Debug, Clone, Copy)]
pub struct PrepareOptions {
    pub chunk_size: NonZeroUsize,
    pub max_points_per_chunk: usize,
}

/// Chunks, downsamples and colours every source, in map (name) order.
/// Per-source bar over its chunks, labelled with the source name.
fn source_progress(name: &str, chunks: usize) -> ProgressBar {
    let bar = ProgressBar::new(chunks as u64).with_message(format!("Processing {name}"));
    if let Ok(style) = ProgressStyle::with_template("{msg} {bar:40.green/black} {pos}/{len} chunks") {
        bar.set_style(style);
    }
    bar
}

pub fn prepare_scene<R: Rng + ?Sized>(
    clouds: &BTreeMap<String, LoadedCloud>,
    opts: PrepareOptions,
    rng: &mut R,
) -> Scene {
    let mut sources = Vec::with_capacity(clouds.len());
    let mut chunks = Vec::new();
    let mut stats = DownsampleStats::default();
    let mut bounds: Option<Aabb> = None;

    for (source, (name, cloud)) in clouds.iter().enumerate() {
        let color = palette_color(source);
        let mut source_stats = DownsampleStats::default();
        let n_chunks = cloud.points.len().div_ceil(opts.chunk_size.get());
        let bar = source_progress(name, n_chunks);

        for slice in chunk(&cloud.points, opts.chunk_size) {
            let sampled = downsample(slice, opts.max_points_per_chunk, rng);
            source_stats += DownsampleStats {
                original: sampled.original,
                kept: sampled.kept,
            };

            let points = sampled.points.into_owned();
            if let Some(b) = Aabb::of(&points) {
                bounds = Some(bounds.map_or(b, |acc| acc.union(b)));
            }

            chunks.push(PreparedChunk {
                source,
                color,
                points,
            });
            bar.inc(1);
        }
        bar.finish();

        log::debug!(
            "{name}: {} -> {} points in {n_chunks} chunks",
            source_stats.original,
            source_stats.kept,
        );

        stats += source_stats;
        sources.push(SourceSummary {
            name: name.clone(),
            color,
            stats: source_stats,
        });
    }

    Scene {
        sources,
        chunks,
        stats,
        bounds,
    }
}
