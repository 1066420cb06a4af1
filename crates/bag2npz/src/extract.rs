//! The extraction procedure: list topics, count and decode point grids, write the archive.

use crate::bag::{LogError, LogPayload, MessageLog};
use crate::config::Config;
use crate::pointcloud2;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use pcnpz::Point;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

/// How a run ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `--list`: the sorted topic names.
    Listed(Vec<String>),
    /// No `--topic` given outside list mode.
    MissingTopic,
    /// The topic carried no point-grid messages; nothing was written.
    NoMessages { topic: String },
    Written {
        path: PathBuf,
        messages: usize,
        points: usize,
    },
}

/// Sorted, de-duplicated topic names of every message in the log.
pub fn list_channels<L: MessageLog>(log: &L) -> Result<Vec<String>, LogError> {
    let mut topics = BTreeSet::new();
    log.visit::<LogError, _>(None, |msg| {
        if !topics.contains(msg.channel) {
            topics.insert(msg.channel.to_owned());
        }
        Ok(())
    })?;

    Ok(topics.into_iter().collect())
}

/// Number of point-grid messages on `channel`.
pub fn count_matching_messages<L: MessageLog>(log: &L, channel: &str) -> Result<usize, LogError> {
    let mut count = 0;
    log.visit::<LogError, _>(Some(channel), |msg| {
        if msg.is_point_grid() {
            count += 1;
        }
        Ok(())
    })?;

    Ok(count)
}

/// All points of every point-grid message on `channel`, concatenated in log order.
///
/// `on_message` is called after each message with the running point count.
pub fn collect_points<L, F>(log: &L, channel: &str, mut on_message: F) -> Result<Vec<Point>, LogError>
where
    L: MessageLog,
    F: FnMut(usize),
{
    let mut combined: Vec<Point> = Vec::new();
    log.visit::<LogError, _>(Some(channel), |msg| {
        let grid = match msg.payload()? {
            LogPayload::PointGrid(grid) => grid,
            LogPayload::Opaque { bytes } => {
                debug!(
                    "{} @ {}ns: skipping {bytes}-byte {} message",
                    msg.channel, msg.time_ns, msg.schema.type_name
                );
                return Ok(());
            }
        };

        let points = pointcloud2::extract_points(&grid)?;
        debug!(
            "{} @ {}ns ({}, frame {}): {}x{} grid, {} valid points",
            msg.channel,
            msg.time_ns,
            msg.schema.type_name,
            grid.frame_id,
            grid.height,
            grid.width,
            points.len()
        );
        combined.extend_from_slice(&points);
        on_message(combined.len());
        Ok(())
    })?;

    Ok(combined)
}

fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} message [{elapsed_precise}<{eta_precise}] {msg}")
    {
        bar.set_style(style);
    }
    bar
}

fn missing_topic() -> Outcome {
    println!("Error: Please specify a topic using the -t or --topic option.");
    Outcome::MissingTopic
}

/// Argument checks that need no log. Outside list mode a topic is required.
pub fn precheck(cfg: &Config) -> Option<Outcome> {
    (!cfg.list && cfg.requested_topic().is_none()).then(missing_topic)
}

/// Runs the whole procedure against `log`. `stamp` is the run's `YYYYmmdd_HHMMSS` time,
/// used for the default output name and for the multi-file archive name.
pub fn run<L: MessageLog>(log: &L, cfg: &Config, stamp: &str) -> Result<Outcome> {
    if cfg.list {
        let topics = list_channels(log)?;
        println!("Topics in the bag file:");
        for topic in &topics {
            println!("  {topic}");
        }
        return Ok(Outcome::Listed(topics));
    }

    let Some(topic) = cfg.requested_topic() else {
        return Ok(missing_topic());
    };

    let output = cfg.output_or_default(stamp);

    let total_messages = count_matching_messages(log, topic)?;
    if total_messages == 0 {
        println!("No PointCloud2 messages found on topic {topic}");
        return Ok(Outcome::NoMessages {
            topic: topic.to_owned(),
        });
    }

    println!("Found {total_messages} PointCloud2 messages. Starting conversion...");

    let bar = progress_bar(total_messages);
    let points = collect_points(log, topic, |total_points| {
        bar.inc(1);
        bar.set_message(format!("Total Points: {total_points}"));
    })?;
    bar.finish();

    let path = if cfg.single {
        let path = pcnpz::with_npz_extension(&output);
        pcnpz::write_points(&path, &points)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved all point clouds to {}", path.display());
        println!("Total number of points in the combined cloud: {}", points.len());
        path
    } else {
        fs::create_dir_all(&output)
            .with_context(|| format!("Failed to create output directory {}", output.display()))?;
        let path = output.join(format!("pointcloud_{stamp}.{}", pcnpz::NPZ_EXTENSION));
        pcnpz::write_points(&path, &points)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved 1 point cloud files to {}", output.display());
        path
    };

    info!("Wrote {} points to {}", points.len(), path.display());

    println!("Total number of PointCloud2 messages processed: {total_messages}");
    println!("Shape of the combined point cloud: ({}, 3)", points.len());

    Ok(Outcome::Written {
        path,
        messages: total_messages,
        points: points.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::memory::{cloud_schema, string_schema, MemoryLog};
    use crate::pointcloud2::{encode, xyz_f32_grid};
    use clap::Parser;

    const STAMP: &str = "20240102_030405";

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["bag2npz", "test.bag"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    fn sample_log() -> MemoryLog {
        let cloud = cloud_schema();
        let text = string_schema();

        let mut log = MemoryLog::default();
        log.push("/b", &text, b"\x02\x00\x00\x00hi".to_vec());
        log.push("/a", &cloud, encode(&xyz_f32_grid(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])));
        log.push("/b", &text, b"\x02\x00\x00\x00yo".to_vec());
        log.push(
            "/a",
            &cloud,
            encode(&xyz_f32_grid(&[[7.0, 8.0, 9.0], [f32::NAN, 0.0, 0.0]])),
        );
        log
    }

    #[test]
    fn channels_are_sorted_and_unique() {
        let topics = list_channels(&sample_log()).unwrap();
        assert_eq!(topics, vec!["/a".to_owned(), "/b".to_owned()]);
    }

    #[test]
    fn only_point_grids_are_counted() {
        let log = sample_log();
        assert_eq!(count_matching_messages(&log, "/a").unwrap(), 2);
        assert_eq!(count_matching_messages(&log, "/b").unwrap(), 0);
        assert_eq!(count_matching_messages(&log, "/missing").unwrap(), 0);
    }

    #[test]
    fn list_mode_reports_topics() {
        let outcome = run(&sample_log(), &config(&["--list"]), STAMP).unwrap();
        assert_eq!(outcome, Outcome::Listed(vec!["/a".into(), "/b".into()]));
    }

    #[test]
    fn missing_topic_is_a_clean_outcome() {
        let outcome = run(&sample_log(), &config(&[]), STAMP).unwrap();
        assert_eq!(outcome, Outcome::MissingTopic);
    }

    #[test]
    fn empty_topic_counts_as_missing() {
        let cfg = config(&["-t", ""]);
        assert_eq!(precheck(&cfg), Some(Outcome::MissingTopic));
        assert_eq!(run(&sample_log(), &cfg, STAMP).unwrap(), Outcome::MissingTopic);

        assert_eq!(precheck(&config(&["--list"])), None);
        assert_eq!(precheck(&config(&["-t", "/a"])), None);
    }

    #[test]
    fn zero_messages_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let cfg = config(&["-t", "/b", "-o", out.to_str().unwrap()]);

        let outcome = run(&sample_log(), &cfg, STAMP).unwrap();

        assert_eq!(outcome, Outcome::NoMessages { topic: "/b".into() });
        assert!(!out.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn single_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cloud");
        let cfg = config(&["-t", "/a", "-s", "-o", out.to_str().unwrap()]);

        let outcome = run(&sample_log(), &cfg, STAMP).unwrap();

        let expected_path = dir.path().join("cloud.npz");
        assert_eq!(
            outcome,
            Outcome::Written {
                path: expected_path.clone(),
                messages: 2,
                points: 3,
            }
        );

        let loaded = pcnpz::read_archive(&expected_path).unwrap();
        assert_eq!(
            loaded.points,
            vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]
        );
        assert_eq!(loaded.key, pcnpz::ArrayKey::Points);
    }

    #[test]
    fn directory_mode_names_archive_by_run_time() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        let cfg = config(&["-t", "/a", "-o", out.to_str().unwrap()]);

        run(&sample_log(), &cfg, STAMP).unwrap();

        let archive = out.join(format!("pointcloud_{STAMP}.npz"));
        assert!(archive.is_file());
        assert_eq!(pcnpz::read_archive(&archive).unwrap().len(), 3);
    }

    #[test]
    fn malformed_grid_is_a_log_error() {
        let mut log = MemoryLog::default();
        log.push("/a", &cloud_schema(), vec![0u8; 7]);

        let err = collect_points(&log, "/a", |_| {}).unwrap_err();
        assert!(matches!(err, LogError::Decode(_)));
    }
}
