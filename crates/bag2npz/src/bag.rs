//! Message-log access: a small trait over "channels of timestamped payloads", the ROS 1 bag
//! implementation of it, and the schema check that tells point grids from everything else.

use crate::pointcloud2::{self, DecodeError, PointGrid, REQUIRED_FIELDS};
use rosbag::record_types::{Chunk, MessageData};
use rosbag::{ChunkRecord, IndexRecord, MessageRecord, RosBag};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const POINT_CLOUD2_TYPE: &str = "sensor_msgs/PointCloud2";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("cannot open {}: {message}", path.display())]
    Open { path: PathBuf, message: String },

    #[error("{0}")]
    Read(String),

    #[error("message on connection {0} has no connection record")]
    UnknownConnection(u32),

    #[error("malformed PointCloud2 message: {0}")]
    Decode(#[from] DecodeError),
}

/// Message type name plus the names of its top-level fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub type_name: String,
    pub fields: Vec<String>,
}

impl MessageSchema {
    /// Builds a schema from a connection's type and its `.msg` definition text.
    ///
    /// Definitions are only parsed up to the first `===` separator; what follows describes
    /// nested types. An empty definition for the well-known cloud type gets its stock fields.
    pub fn from_definition(type_name: &str, definition: &str) -> Self {
        let mut fields = parse_top_level_fields(definition);
        if fields.is_empty() && type_name == POINT_CLOUD2_TYPE {
            fields = [
                "header",
                "height",
                "width",
                "fields",
                "is_bigendian",
                "point_step",
                "row_step",
                "data",
                "is_dense",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        }

        Self {
            type_name: type_name.to_owned(),
            fields,
        }
    }

    /// True when every required grid field is declared.
    pub fn is_point_grid(&self) -> bool {
        REQUIRED_FIELDS
            .iter()
            .all(|req| self.fields.iter().any(|f| f == req))
    }
}

fn parse_top_level_fields(definition: &str) -> Vec<String> {
    let mut fields = Vec::new();

    for line in definition.lines() {
        if line.starts_with("===") {
            break;
        }

        let line = line.split('#').next().unwrap_or("").trim();
        // Constants ("uint8 INT8 = 1") are not fields.
        if line.is_empty() || line.contains('=') {
            continue;
        }

        let mut parts = line.split_whitespace();
        if let (Some(_ty), Some(name)) = (parts.next(), parts.next()) {
            fields.push(name.to_owned());
        }
    }

    fields
}

/// One entry of a log: channel, schema, logical time and raw payload.
#[derive(Debug, Clone, Copy)]
pub struct LogMessage<'a> {
    pub channel: &'a str,
    pub schema: &'a MessageSchema,
    pub time_ns: u64,
    pub data: &'a [u8],
}

/// What a payload is, decided by its schema.
#[derive(Debug)]
pub enum LogPayload {
    PointGrid(PointGrid),
    /// Not a point grid; only its size is kept.
    Opaque { bytes: usize },
}

impl<'a> LogMessage<'a> {
    #[inline]
    pub fn is_point_grid(&self) -> bool {
        self.schema.is_point_grid()
    }

    pub fn payload(&self) -> Result<LogPayload, DecodeError> {
        if self.is_point_grid() {
            pointcloud2::decode(self.data).map(LogPayload::PointGrid)
        } else {
            Ok(LogPayload::Opaque {
                bytes: self.data.len(),
            })
        }
    }
}

/// A sequential, channelized message log.
pub trait MessageLog {
    /// Calls `visit` for every message (optionally only those on `channel`), in log order,
    /// which is receive-time order. Messages with equal times keep their stored order.
    /// The first error returned by `visit` stops the walk and is passed through.
    fn visit<E, F>(&self, channel: Option<&str>, visit: F) -> Result<(), E>
    where
        E: From<LogError>,
        F: FnMut(LogMessage<'_>) -> Result<(), E>;
}

#[derive(Debug)]
struct Connection {
    topic: String,
    schema: MessageSchema,
}

/// A ROS 1 (v2.0) bag file.
///
/// Chunks are walked by their indexed start time, and the messages inside each chunk are
/// sorted by receive time. Chunks whose time ranges overlap are not interleaved. A bag
/// without chunk info records is walked in file order.
pub struct RosBagLog {
    bag: RosBag,
    connections: HashMap<u32, Connection>,
    /// File offsets of the chunk records, earliest start time first.
    chunk_order: Vec<u64>,
}

impl RosBagLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let path = path.as_ref();
        let bag = RosBag::new(path).map_err(|e| LogError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut connections = HashMap::new();
        let mut chunks = Vec::new();
        for record in bag.index_records() {
            match record.map_err(read_err)? {
                IndexRecord::Connection(conn) => {
                    connections.insert(
                        conn.id,
                        Connection {
                            topic: conn.topic.to_owned(),
                            schema: MessageSchema::from_definition(conn.tp, conn.message_definition),
                        },
                    );
                }
                IndexRecord::ChunkInfo(info) => chunks.push((info.start_time, info.chunk_pos)),
                IndexRecord::IndexData(_) => {}
            }
        }
        chunks.sort_unstable();

        log::debug!(
            "Opened {} with {} connections and {} indexed chunks",
            path.display(),
            connections.len(),
            chunks.len()
        );

        Ok(Self {
            bag,
            connections,
            chunk_order: chunks.into_iter().map(|(_, pos)| pos).collect(),
        })
    }

    fn visit_chunk<E, F>(
        &self,
        chunk: &Chunk<'_>,
        channel: Option<&str>,
        visit: &mut F,
    ) -> Result<(), E>
    where
        E: From<LogError>,
        F: FnMut(LogMessage<'_>) -> Result<(), E>,
    {
        let mut messages: Vec<MessageData<'_>> = Vec::new();
        for record in chunk.messages() {
            if let MessageRecord::MessageData(data) = record.map_err(read_err)? {
                messages.push(data);
            }
        }
        messages.sort_by_key(|m| m.time);

        for data in messages {
            let conn = self
                .connections
                .get(&data.conn_id)
                .ok_or(LogError::UnknownConnection(data.conn_id))?;

            if channel.map_or(false, |c| c != conn.topic) {
                continue;
            }

            visit(LogMessage {
                channel: &conn.topic,
                schema: &conn.schema,
                time_ns: data.time,
                data: data.data,
            })?;
        }

        Ok(())
    }
}

#[inline]
fn read_err<E: std::fmt::Display>(e: E) -> LogError {
    LogError::Read(e.to_string())
}

impl MessageLog for RosBagLog {
    fn visit<E, F>(&self, channel: Option<&str>, mut visit: F) -> Result<(), E>
    where
        E: From<LogError>,
        F: FnMut(LogMessage<'_>) -> Result<(), E>,
    {
        if self.chunk_order.is_empty() {
            for record in self.bag.chunk_records() {
                if let ChunkRecord::Chunk(chunk) = record.map_err(read_err)? {
                    self.visit_chunk(&chunk, channel, &mut visit)?;
                }
            }
            return Ok(());
        }

        for &pos in &self.chunk_order {
            let mut records = self.bag.chunk_records();
            records.seek(pos).map_err(read_err)?;
            match records.next().transpose().map_err(read_err)? {
                Some(ChunkRecord::Chunk(chunk)) => self.visit_chunk(&chunk, channel, &mut visit)?,
                _ => return Err(LogError::Read(format!("no chunk record at offset {pos}")).into()),
            }
        }

        Ok(())
    }
}

/// An in-memory log for tests.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    #[derive(Default)]
    pub struct MemoryLog {
        entries: Vec<(String, MessageSchema, u64, Vec<u8>)>,
    }

    impl MemoryLog {
        pub fn push(&mut self, channel: &str, schema: &MessageSchema, data: Vec<u8>) {
            let time_ns = self.entries.len() as u64 * 100_000_000;
            self.entries
                .push((channel.to_owned(), schema.clone(), time_ns, data));
        }
    }

    impl MessageLog for MemoryLog {
        fn visit<E, F>(&self, channel: Option<&str>, mut visit: F) -> Result<(), E>
        where
            E: From<LogError>,
            F: FnMut(LogMessage<'_>) -> Result<(), E>,
        {
            for (topic, schema, time_ns, data) in &self.entries {
                if channel.map_or(true, |c| c == topic) {
                    visit(LogMessage {
                        channel: topic,
                        schema,
                        time_ns: *time_ns,
                        data,
                    })?;
                }
            }
            Ok(())
        }
    }

    pub fn cloud_schema() -> MessageSchema {
        MessageSchema::from_definition(POINT_CLOUD2_TYPE, "")
    }

    pub fn string_schema() -> MessageSchema {
        MessageSchema::from_definition("std_msgs/String", "string data\n")
    }
}
