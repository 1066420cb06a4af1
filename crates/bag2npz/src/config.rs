use clap::Parser;
use std::path::PathBuf;

/// `bag2npz` - Extract PointCloud2 messages from a ROS bag.
///
/// All x/y/z points of the chosen topic are concatenated in message order
/// and saved as a compressed NumPy archive holding one `points` array of
/// shape (N, 3).
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Path to the ROS bag file.
    pub bag_file: PathBuf,

    /// The PointCloud2 topic to extract.
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Output file (with --single) or directory name.
    ///
    /// Defaults to `pointcloud_output_<YYYYmmdd_HHMMSS>` in the current
    /// directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List all topics in the bag file and exit.
    #[arg(short, long, default_value_t = false)]
    pub list: bool,

    /// Save all point clouds into a single .npz file.
    #[arg(short, long, default_value_t = false)]
    pub single: bool,
}

impl Config {
    /// The selected topic. An empty `-t ""` counts as no topic.
    pub fn requested_topic(&self) -> Option<&str> {
        self.topic.as_deref().filter(|t| !t.is_empty())
    }

    /// The output path, falling back to the stamped default.
    pub fn output_or_default(&self, stamp: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("pointcloud_output_{stamp}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_parse() {
        let cfg =
            Config::try_parse_from(["bag2npz", "run.bag", "-t", "/velodyne_points", "-s", "-o", "out"])
                .unwrap();

        assert_eq!(cfg.bag_file, PathBuf::from("run.bag"));
        assert_eq!(cfg.topic.as_deref(), Some("/velodyne_points"));
        assert!(cfg.single);
        assert!(!cfg.list);
        assert_eq!(cfg.output_or_default("x"), PathBuf::from("out"));
    }

    #[test]
    fn empty_topic_is_no_topic() {
        let cfg = Config::try_parse_from(["bag2npz", "run.bag", "-t", ""]).unwrap();
        assert_eq!(cfg.requested_topic(), None);

        let cfg = Config::try_parse_from(["bag2npz", "run.bag", "--topic", "/points"]).unwrap();
        assert_eq!(cfg.requested_topic(), Some("/points"));
    }

    #[test]
    fn default_output_is_stamped() {
        let cfg = Config::try_parse_from(["bag2npz", "run.bag", "--list"]).unwrap();

        assert!(cfg.list);
        assert_eq!(
            cfg.output_or_default("20240102_030405"),
            PathBuf::from("pointcloud_output_20240102_030405")
        );
    }
}
