use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// `npz-viewer` - Visualize .npz point clouds.
///
/// Loads a single archive, or every .npz file directly inside a directory,
/// and shows each source in its own colour. Large sources are split into
/// chunks and randomly downsampled before upload.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to a .npz file or a directory containing .npz files.
    pub path: PathBuf,

    /// Number of points per render chunk.
    #[arg(long, default_value = "1000000")]
    pub chunk_size: NonZeroUsize,

    /// Upper bound on points kept from each chunk.
    #[arg(long, default_value_t = 500_000)]
    pub max_points_per_chunk: usize,

    /// Rendered point size in pixels.
    #[arg(long, default_value_t = 1.0)]
    pub point_size: f32,

    /// Seed for the downsampling RNG. Seeded from OS entropy when absent.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_render_settings() {
        let cfg = Config::try_parse_from(["npz-viewer", "clouds/"]).unwrap();

        assert_eq!(cfg.path, PathBuf::from("clouds/"));
        assert_eq!(cfg.chunk_size.get(), 1_000_000);
        assert_eq!(cfg.max_points_per_chunk, 500_000);
        assert_eq!(cfg.point_size, 1.0);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(Config::try_parse_from(["npz-viewer", "a.npz", "--chunk-size", "0"]).is_err());
    }
}
