//! `sensor_msgs/PointCloud2` in ROS 1 wire format, and XYZ extraction from it.
//!
//! Wire layout (little-endian, strings and arrays are u32-length-prefixed):
//!   header      : u32 seq, u32 stamp_sec, u32 stamp_nsec, string frame_id
//!   height      : u32
//!   width       : u32
//!   fields      : u32 n, then n x { string name, u32 offset, u8 datatype, u32 count }
//!   is_bigendian: u8
//!   point_step  : u32
//!   row_step    : u32
//!   data        : u32 len, then len bytes
//!   is_dense    : u8   (tolerated when missing)

use pcnpz::Point;

/// Top-level fields that make a message a point grid.
pub const REQUIRED_FIELDS: [&str; 4] = ["height", "width", "fields", "point_step"];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated PointCloud2 message")]
    Truncated,

    #[error("PointCloud2 string is not valid UTF-8")]
    Utf8,

    #[error("PointCloud2 has no '{0}' field")]
    MissingField(&'static str),

    #[error("PointCloud2 field '{name}' has unknown datatype {datatype}")]
    Datatype { name: String, datatype: u8 },

    #[error("PointCloud2 point ({row}, {col}) lies outside the {len}-byte data blob")]
    OutOfBounds { row: u32, col: u32, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PointFieldDatatype {
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl PointFieldDatatype {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Int8,
            2 => Self::UInt8,
            3 => Self::Int16,
            4 => Self::UInt16,
            5 => Self::Int32,
            6 => Self::UInt32,
            7 => Self::Float32,
            8 => Self::Float64,
            _ => return None,
        })
    }

    #[inline]
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Reads one scalar of this type from the start of `b`.
    #[inline]
    fn read(self, b: &[u8], big_endian: bool) -> f64 {
        macro_rules! num {
            ($t:ty, $n:expr) => {{
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&b[..$n]);
                if big_endian {
                    <$t>::from_be_bytes(raw) as f64
                } else {
                    <$t>::from_le_bytes(raw) as f64
                }
            }};
        }

        match self {
            Self::Int8 => b[0] as i8 as f64,
            Self::UInt8 => b[0] as f64,
            Self::Int16 => num!(i16, 2),
            Self::UInt16 => num!(u16, 2),
            Self::Int32 => num!(i32, 4),
            Self::UInt32 => num!(u32, 4),
            Self::Float32 => num!(f32, 4),
            Self::Float64 => num!(f64, 8),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

/// A decoded `PointCloud2`. Only the layout is interpreted; `data` stays raw.
#[derive(Debug, Clone, PartialEq)]
pub struct PointGrid {
    pub frame_id: String,
    pub stamp_ns: u64,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl PointGrid {
    #[inline]
    pub fn num_points(&self) -> usize {
        self.height as usize * self.width as usize
    }

    pub fn field(&self, name: &str) -> Option<&PointField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < n {
        return Err(DecodeError::Truncated);
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_string(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = le_u32(buf)? as usize;
    let raw = take(buf, len)?;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| DecodeError::Utf8)
}

/// Decode a ROS 1 serialized `sensor_msgs/PointCloud2`.
pub fn decode(mut p: &[u8]) -> Result<PointGrid, DecodeError> {
    let _seq = le_u32(&mut p)?;
    let sec = le_u32(&mut p)?;
    let nsec = le_u32(&mut p)?;
    let frame_id = le_string(&mut p)?;

    let height = le_u32(&mut p)?;
    let width = le_u32(&mut p)?;

    let n_fields = le_u32(&mut p)? as usize;
    // Each field record is at least 13 bytes; guard the allocation against garbage counts.
    let mut fields = Vec::with_capacity(n_fields.min(p.len() / 13));
    for _ in 0..n_fields {
        let name = le_string(&mut p)?;
        let offset = le_u32(&mut p)?;
        let datatype = le_u8(&mut p)?;
        let count = le_u32(&mut p)?;
        fields.push(PointField {
            name,
            offset,
            datatype,
            count,
        });
    }

    let is_bigendian = le_u8(&mut p)? != 0;
    let point_step = le_u32(&mut p)?;
    let row_step = le_u32(&mut p)?;
    let data_len = le_u32(&mut p)? as usize;
    let data = take(&mut p, data_len)?.to_vec();
    let is_dense = match p.first() {
        Some(&b) => b != 0,
        None => false,
    };

    Ok(PointGrid {
        frame_id,
        stamp_ns: sec as u64 * 1_000_000_000 + nsec as u64,
        height,
        width,
        fields,
        is_bigendian,
        point_step,
        row_step,
        data,
        is_dense,
    })
}

/// Read `x`, `y`, `z` of every point in row-major order, skipping points with a NaN coordinate.
pub fn extract_points(grid: &PointGrid) -> Result<Vec<Point>, DecodeError> {
    let mut axes = Vec::with_capacity(3);
    for name in ["x", "y", "z"] {
        let field = grid.field(name).ok_or(DecodeError::MissingField(name))?;
        let datatype =
            PointFieldDatatype::from_u8(field.datatype).ok_or_else(|| DecodeError::Datatype {
                name: field.name.clone(),
                datatype: field.datatype,
            })?;
        axes.push((field.offset as usize, datatype));
    }

    let data = &grid.data;
    let upper_bound = data.len() / (grid.point_step as usize).max(1);
    let mut points = Vec::with_capacity(grid.num_points().min(upper_bound));

    for row in 0..grid.height {
        let row_base = row as usize * grid.row_step as usize;
        for col in 0..grid.width {
            let base = row_base + col as usize * grid.point_step as usize;

            let mut xyz = [0.0f64; 3];
            for (slot, &(offset, datatype)) in xyz.iter_mut().zip(&axes) {
                let start = base + offset;
                let bytes = data
                    .get(start..start + datatype.size())
                    .ok_or(DecodeError::OutOfBounds {
                        row,
                        col,
                        len: data.len(),
                    })?;
                *slot = datatype.read(bytes, grid.is_bigendian);
            }

            if xyz.iter().any(|v| v.is_nan()) {
                continue;
            }
            points.push([xyz[0] as f32, xyz[1] as f32, xyz[2] as f32]);
        }
    }

    Ok(points)
}

/// ROS 1 serialization of a grid; the inverse of [`decode`]. Used to build test bags.
#[cfg(test)]
pub(crate) fn encode(grid: &PointGrid) -> Vec<u8> {
    fn put_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }
    fn put_str(out: &mut Vec<u8>, s: &str) {
        put_u32(out, s.len() as u32);
        out.extend_from_slice(s.as_bytes());
    }

    let mut out = Vec::new();
    put_u32(&mut out, 0);
    put_u32(&mut out, (grid.stamp_ns / 1_000_000_000) as u32);
    put_u32(&mut out, (grid.stamp_ns % 1_000_000_000) as u32);
    put_str(&mut out, &grid.frame_id);
    put_u32(&mut out, grid.height);
    put_u32(&mut out, grid.width);
    put_u32(&mut out, grid.fields.len() as u32);
    for f in &grid.fields {
        put_str(&mut out, &f.name);
        put_u32(&mut out, f.offset);
        out.push(f.datatype);
        put_u32(&mut out, f.count);
    }
    out.push(grid.is_bigendian as u8);
    put_u32(&mut out, grid.point_step);
    put_u32(&mut out, grid.row_step);
    put_u32(&mut out, grid.data.len() as u32);
    out.extend_from_slice(&grid.data);
    out.push(grid.is_dense as u8);
    out
}

/// An unorganized (height = 1) XYZ float32 cloud, the usual LiDAR driver output.
#[cfg(test)]
pub(crate) fn xyz_f32_grid(points: &[[f32; 3]]) -> PointGrid {
    let fields = ["x", "y", "z"]
        .iter()
        .enumerate()
        .map(|(i, name)| PointField {
            name: (*name).to_owned(),
            offset: i as u32 * 4,
            datatype: PointFieldDatatype::Float32 as u8,
            count: 1,
        })
        .collect();

    // 16-byte stride with a trailing pad, like PCL's PointXYZ.
    let mut data = Vec::with_capacity(points.len() * 16);
    for p in points {
        for v in p {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&[0u8; 4]);
    }

    PointGrid {
        frame_id: "lidar".into(),
        stamp_ns: 1_700_000_000_500_000_000,
        height: 1,
        width: points.len() as u32,
        fields,
        is_bigendian: false,
        point_step: 16,
        row_step: points.len() as u32 * 16,
        data,
        is_dense: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_back_encoded_layout() {
        let grid = xyz_f32_grid(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let decoded = decode(&encode(&grid)).unwrap();
        assert_eq!(decoded, grid);
        assert_eq!(decoded.num_points(), 2);
    }

    #[test]
    fn nan_points_are_skipped() {
        let grid = xyz_f32_grid(&[
            [1.0, 2.0, 3.0],
            [f32::NAN, 0.0, 0.0],
            [0.0, 0.0, f32::NAN],
            [-4.5, 0.25, 9.0],
        ]);

        let points = extract_points(&grid).unwrap();

        assert_eq!(points, vec![[1.0, 2.0, 3.0], [-4.5, 0.25, 9.0]]);
    }

    #[test]
    fn big_endian_float64_organized_grid() {
        let values = [[1.5f64, -2.0, 3.25], [10.0, 20.0, 30.0]];
        let mut data = Vec::new();
        for p in &values {
            for v in p {
                data.extend_from_slice(&v.to_be_bytes());
            }
        }
        let grid = PointGrid {
            frame_id: String::new(),
            stamp_ns: 0,
            height: 2,
            width: 1,
            fields: ["x", "y", "z"]
                .iter()
                .enumerate()
                .map(|(i, n)| PointField {
                    name: (*n).into(),
                    offset: i as u32 * 8,
                    datatype: PointFieldDatatype::Float64 as u8,
                    count: 1,
                })
                .collect(),
            is_bigendian: true,
            point_step: 24,
            row_step: 24,
            data,
            is_dense: true,
        };

        let points = extract_points(&grid).unwrap();

        assert_eq!(points, vec![[1.5, -2.0, 3.25], [10.0, 20.0, 30.0]]);
    }

    #[test]
    fn integer_fields_are_widened() {
        let grid = PointGrid {
            frame_id: String::new(),
            stamp_ns: 0,
            height: 1,
            width: 1,
            fields: vec![
                PointField { name: "x".into(), offset: 0, datatype: 1, count: 1 },
                PointField { name: "y".into(), offset: 1, datatype: 4, count: 1 },
                PointField { name: "z".into(), offset: 3, datatype: 5, count: 1 },
            ],
            is_bigendian: false,
            point_step: 7,
            row_step: 7,
            data: [&[0xFFu8][..], &500u16.to_le_bytes()[..], &(-7i32).to_le_bytes()[..]].concat(),
            is_dense: true,
        };

        assert_eq!(extract_points(&grid).unwrap(), vec![[-1.0, 500.0, -7.0]]);
    }

    #[test]
    fn missing_axis_is_an_error() {
        let mut grid = xyz_f32_grid(&[[1.0, 2.0, 3.0]]);
        grid.fields.retain(|f| f.name != "z");

        assert!(matches!(
            extract_points(&grid),
            Err(DecodeError::MissingField("z"))
        ));
    }

    #[test]
    fn layout_past_the_blob_is_an_error() {
        let mut grid = xyz_f32_grid(&[[1.0, 2.0, 3.0]]);
        grid.width = 2;

        assert!(matches!(
            extract_points(&grid),
            Err(DecodeError::OutOfBounds { col: 1, .. })
        ));
    }

    #[test]
    fn truncated_message_is_rejected() {
        let bytes = encode(&xyz_f32_grid(&[[1.0, 2.0, 3.0]]));
        assert!(matches!(
            decode(&bytes[..bytes.len() - 10]),
            Err(DecodeError::Truncated)
        ));
    }
}
