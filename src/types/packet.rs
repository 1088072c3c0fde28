//! Packet types shared by the cache and the write queue

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{PipelineError, Result};

/// Logical layout of a packet, used only to derive its byte length.
///
/// The pipeline never interprets packet content; a shape just lets callers
/// describe "a 640x480 frame of 3-byte pixels" and have the length checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketShape {
    /// Elements per row
    pub width: usize,

    /// Number of rows
    pub height: usize,

    /// Size of one element in bytes
    pub elem_size: usize,
}

impl PacketShape {
    /// Create a new shape
    pub fn new(width: usize, height: usize, elem_size: usize) -> Self {
        Self { width, height, elem_size }
    }

    /// Total element count, `None` on overflow
    pub fn element_count(&self) -> Option<usize> {
        self.width.checked_mul(self.height)
    }

    /// Byte length described by this shape, `None` on overflow
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.elem_size)
    }
}

/// Immutable binary unit flowing through the pipeline.
///
/// Cloning is cheap (the bytes are shared); the content can never change once
/// the packet exists. An empty packet marks the end of a sequence for
/// prefetching purposes.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    data: Arc<[u8]>,
    shape: Option<PacketShape>,
}

impl Packet {
    /// Create a packet from owned bytes
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into(), shape: None }
    }

    /// Create a packet by copying a byte slice
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data)
    }

    /// Create a packet with a shape, checking that the shape matches the data
    pub fn with_shape(data: impl Into<Arc<[u8]>>, shape: PacketShape) -> Result<Self> {
        let data = data.into();
        let expected = shape.byte_len().ok_or_else(|| {
            PipelineError::invalid_configuration(format!("packet shape {shape:?} overflows usize"))
        })?;
        if expected != data.len() {
            return Err(PipelineError::ShapeMismatch { expected, actual: data.len() });
        }
        Ok(Self { data, shape: Some(shape) })
    }

    /// The end-of-sequence sentinel
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy bytes out of a larger buffer, keeping a previously validated shape
    pub(crate) fn copied_from(bytes: &[u8], shape: Option<PacketShape>) -> Self {
        Self { data: Arc::from(bytes), shape }
    }

    /// Packet bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Byte length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this packet carries no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shape metadata, if the packet was built with one
    pub fn shape(&self) -> Option<PacketShape> {
        self.shape
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Packet {}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Format a packet index as a zero-padded name.
///
/// Sequences shorter than ten million packets use six digits, longer ones
/// nine, so that lexical and numeric order agree for file-per-packet sinks.
pub fn packet_name(index: usize, total_packets: usize) -> String {
    if total_packets < 10_000_000 { format!("{index:06}") } else { format!("{index:09}") }
}
