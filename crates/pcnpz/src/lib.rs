//! PCNPZ: XYZ point sets in NumPy `.npz` archives.
//!
//! - A point is `[f32; 3]` (x, y, z) in the sensor frame, metres.
//! - An archive is a ZIP container of `.npy` members (what `numpy.savez_compressed` writes).
//! - Writers emit a single member `points.npy`: float32, C order, shape `(N, 3)`, deflated.
//! - Readers prefer the `points` member; otherwise they fall back to the first member in
//!   ZIP directory order and report it through [`ArrayKey::Fallback`].
//! - Readers accept `<f4`/`>f4` and `<f8`/`>f8`; f64 data is narrowed to f32.
//! - Readers accept C and Fortran order; points always come back row by row.
//!
//! Directory layout accepted by [`load_path`]:
//!   <dir>/*.npz          one source per file, keyed by file name (not recursive)
//!   <file>.npz           a single source keyed as [`SINGLE_CLOUD`]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use npyz::{NpyFile, Order, WriterBuilder};
use walkdir::WalkDir;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

pub const NPZ_EXTENSION: &str = "npz";
pub const POINTS_KEY: &str = "points";
pub const SINGLE_CLOUD: &str = "single_cloud";

const NPY_SUFFIX: &str = ".npy";

/// One XYZ point.
pub type Point = [f32; 3];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{}: archive contains no arrays", .0.display())]
    Empty(PathBuf),

    #[error("{}: array '{key}' has shape {shape:?}, expected (N, 3)", path.display())]
    Shape {
        path: PathBuf,
        key: String,
        shape: Vec<u64>,
    },

    #[error("{}: array '{key}' has dtype {dtype}, expected float32 or float64", path.display())]
    DType {
        path: PathBuf,
        key: String,
        dtype: String,
    },
}

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Which member of an archive the points came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayKey {
    /// The conventional `points` member.
    Points,
    /// No `points` member; the first member in directory order was used.
    Fallback(String),
}

impl ArrayKey {
    pub fn name(&self) -> &str {
        match self {
            ArrayKey::Points => POINTS_KEY,
            ArrayKey::Fallback(name) => name,
        }
    }
}

/// A point set read from one archive.
#[derive(Debug, Clone)]
pub struct LoadedCloud {
    pub points: Vec<Point>,
    pub key: ArrayKey,
}

impl LoadedCloud {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Appends `.npz` unless the path already ends with it.
pub fn with_npz_extension<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if has_npz_extension(path) {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(NPZ_EXTENSION);
        PathBuf::from(name)
    }
}

#[inline]
fn has_npz_extension(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(NPZ_EXTENSION)
}

// ------------------------------------------------------------------------------------------------
// Writing
// ------------------------------------------------------------------------------------------------

/// Write `points` as the `points` member of a deflated archive at `path`.
///
/// The path is used verbatim; callers that want numpy's implicit `.npz` suffix go through
/// [`with_npz_extension`] first. An existing file is truncated.
pub fn write_points<P: AsRef<Path>>(path: P, points: &[Point]) -> Result<()> {
    let path = path.as_ref();
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let zip_err = |source| ArchiveError::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_err)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));

    // 12 bytes per point plus the NPY header; zip64 once past the 4 GiB member limit.
    let payload_bytes = (points.len() as u64).saturating_mul(12);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(payload_bytes >= u32::MAX as u64);

    zip.start_file(format!("{POINTS_KEY}{NPY_SUFFIX}"), options)
        .map_err(zip_err)?;
    write_npy_xyz(&mut zip, points).map_err(io_err)?;

    let mut inner = zip.finish().map_err(zip_err)?;
    inner.flush().map_err(io_err)?;

    log::debug!("Wrote {} points to {}", points.len(), path.display());
    Ok(())
}

/// Serialize an `(N, 3)` float32 NPY array into `w`.
fn write_npy_xyz<W: Write>(w: W, points: &[Point]) -> io::Result<()> {
    let mut writer = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&[points.len() as u64, 3])
        .writer(w)
        .begin_nd()?;

    writer.extend(points.iter().flat_map(|p| p.iter().copied()))?;
    writer.finish()
}

// ------------------------------------------------------------------------------------------------
// Reading
// ------------------------------------------------------------------------------------------------

/// Load a single archive, preferring the `points` member.
#[cfg(feature = "mmap")]
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
    let path = path.as_ref();
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    // Safety: the map is read-only and dropped before this function returns.
    let map = unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(io_err)?;
    read_archive_from(io::Cursor::new(&map[..]), path)
}

/// Load a single archive, preferring the `points` member.
#[cfg(not(feature = "mmap"))]
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_archive_from(io::BufReader::new(file), path)
}

/// Parse an archive from any seekable reader. `origin` is only used for error messages.
pub fn read_archive_from<R: Read + Seek>(reader: R, origin: &Path) -> Result<LoadedCloud> {
    let io_err = |source| ArchiveError::Io {
        path: origin.to_path_buf(),
        source,
    };
    let zip_err = |source| ArchiveError::Zip {
        path: origin.to_path_buf(),
        source,
    };

    let mut zip = ZipArchive::new(reader).map_err(zip_err)?;

    // Central directory order, so the fallback choice is stable across runs.
    let mut names = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let member = zip.by_index(index).map_err(zip_err)?;
        if let Some(stem) = member.name().strip_suffix(NPY_SUFFIX) {
            names.push(stem.to_owned());
        }
    }

    let key = if names.iter().any(|n| n == POINTS_KEY) {
        ArrayKey::Points
    } else {
        let first = names
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::Empty(origin.to_path_buf()))?;
        ArrayKey::Fallback(first)
    };

    let member = zip
        .by_name(&format!("{}{NPY_SUFFIX}", key.name()))
        .map_err(zip_err)?;
    let npy = NpyFile::new(member).map_err(io_err)?;

    let shape = npy.shape().to_vec();
    let order = npy.order();
    if shape.len() != 2 || shape[1] != 3 {
        return Err(ArchiveError::Shape {
            path: origin.to_path_buf(),
            key: key.name().to_owned(),
            shape,
        });
    }

    let dtype = npy.dtype().descr();
    let flat: Vec<f32> = if dtype.contains("f4") {
        npy.into_vec::<f32>().map_err(io_err)?
    } else if dtype.contains("f8") {
        npy.into_vec::<f64>()
            .map_err(io_err)?
            .into_iter()
            .map(|v| v as f32)
            .collect()
    } else {
        return Err(ArchiveError::DType {
            path: origin.to_path_buf(),
            key: key.name().to_owned(),
            dtype,
        });
    };

    Ok(LoadedCloud {
        points: group_xyz(&flat, order),
        key,
    })
}

/// Regroup a flat `(N, 3)` buffer into points.
///
/// Fortran order stores the x column first, then y, then z, so element `[i][j]`
/// sits at `j * N + i`.
fn group_xyz(flat: &[f32], order: Order) -> Vec<Point> {
    match order {
        Order::C => flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        Order::Fortran => {
            let n = flat.len() / 3;
            let (xs, rest) = flat.split_at(n);
            let (ys, zs) = rest.split_at(n);
            xs.iter()
                .zip(ys)
                .zip(zs)
                .map(|((&x, &y), &z)| [x, y, z])
                .collect()
        }
    }
}

/// Load a single archive or every archive directly inside a directory.
///
/// Directory entries are keyed by file name; a single file is keyed as [`SINGLE_CLOUD`].
/// The map iterates in key order, which callers use as the stable source order.
pub fn load_path<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, LoadedCloud>> {
    let path = path.as_ref();
    let mut clouds = BTreeMap::new();

    if path.is_dir() {
        let entries = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && has_npz_extension(e.path()));

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let cloud = read_archive(entry.path())?;
            log_fallback(&name, &cloud.key);
            clouds.insert(name, cloud);
        }
    } else if path.is_file() {
        let cloud = read_archive(path)?;
        log_fallback(SINGLE_CLOUD, &cloud.key);
        clouds.insert(SINGLE_CLOUD.to_owned(), cloud);
    } else {
        return Err(ArchiveError::InvalidPath(path.to_path_buf()));
    }

    Ok(clouds)
}

fn log_fallback(source: &str, key: &ArrayKey) {
    if let ArrayKey::Fallback(name) = key {
        log::warn!("{source}: no '{POINTS_KEY}' array, using '{name}' instead");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| {
                let f = i as f32;
                [f * 0.5, -f, f * 1.25 + 3.0]
            })
            .collect()
    }

    /// Builds an archive with arbitrary members, mirroring a user-made `np.savez` file.
    fn write_members(path: &Path, members: &[(&str, Vec<u64>, Vec<f64>)]) {
        write_members_in_order(path, Order::C, members);
    }

    /// `data` is taken as already laid out in `order`.
    fn write_members_in_order(path: &Path, order: Order, members: &[(&str, Vec<u64>, Vec<f64>)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, shape, data) in members {
            zip.start_file(format!("{name}{NPY_SUFFIX}"), FileOptions::default())
                .unwrap();
            let mut writer = npyz::WriteOptions::new()
                .default_dtype()
                .shape(shape)
                .order(order)
                .writer(&mut zip)
                .begin_nd()
                .unwrap();
            writer.extend(data.iter().copied()).unwrap();
            writer.finish().unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn written_points_load_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.npz");
        let points = sample(1000);

        write_points(&path, &points).unwrap();
        let loaded = read_archive(&path).unwrap();

        assert_eq!(loaded.key, ArrayKey::Points);
        assert_eq!(loaded.points, points);
    }

    #[test]
    fn empty_point_set_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.npz");

        write_points(&path, &[]).unwrap();
        let loaded = read_archive(&path).unwrap();

        assert!(loaded.is_empty());
    }

    #[test]
    fn fallback_key_is_reported_and_f64_is_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.npz");
        write_members(
            &path,
            &[
                ("xyz", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
                ("other", vec![1, 3], vec![9.0, 9.0, 9.0]),
            ],
        );

        let loaded = read_archive(&path).unwrap();

        assert_eq!(loaded.key, ArrayKey::Fallback("xyz".into()));
        assert_eq!(loaded.points, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn fortran_order_array_is_read_row_by_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fortran.npz");
        // [[1, 2, 3], [4, 5, 6]] stored column-major.
        write_members_in_order(
            &path,
            Order::Fortran,
            &[("points", vec![2, 3], vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0])],
        );

        let loaded = read_archive(&path).unwrap();

        assert_eq!(loaded.points, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn points_member_wins_over_earlier_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.npz");
        write_members(
            &path,
            &[
                ("colors", vec![1, 3], vec![0.1, 0.2, 0.3]),
                ("points", vec![1, 3], vec![7.0, 8.0, 9.0]),
            ],
        );

        let loaded = read_archive(&path).unwrap();

        assert_eq!(loaded.key, ArrayKey::Points);
        assert_eq!(loaded.points, vec![[7.0, 8.0, 9.0]]);
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.npz");
        write_members(&path, &[("points", vec![4], vec![1.0, 2.0, 3.0, 4.0])]);

        let err = read_archive(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::Shape { .. }), "{err}");
    }

    #[test]
    fn directory_load_keys_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = sample(3);
        let b = sample(5);
        write_points(dir.path().join("a.npz"), &a).unwrap();
        write_points(dir.path().join("b.npz"), &b).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an archive").unwrap();

        let clouds = load_path(dir.path()).unwrap();

        assert_eq!(clouds.len(), 2);
        assert_eq!(clouds["a.npz"].points, a);
        assert_eq!(clouds["b.npz"].points, b);
    }

    #[test]
    fn single_file_load_uses_fixed_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.npz");
        write_points(&path, &sample(4)).unwrap();

        let clouds = load_path(&path).unwrap();

        assert_eq!(clouds.keys().collect::<Vec<_>>(), vec![SINGLE_CLOUD]);
        assert_eq!(clouds[SINGLE_CLOUD].len(), 4);
    }

    #[test]
    fn missing_path_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_path(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidPath(_)));
    }

    #[test]
    fn extension_is_appended_once() {
        assert_eq!(with_npz_extension("out"), PathBuf::from("out.npz"));
        assert_eq!(with_npz_extension("out.npz"), PathBuf::from("out.npz"));
        assert_eq!(with_npz_extension("run.v2"), PathBuf::from("run.v2.npz"));
    }
}
