//! Core data types.
//!
//! - [`Packet`] is an immutable, cheaply clonable byte blob with optional
//!   [`PacketShape`] metadata. Two packets are equal iff their bytes are equal.
//! - [`Enqueued`] reports what happened to a packet handed to a write queue.
//!
//! ## Usage Example
//!
//! ```rust
//! use packetflow::types::{Packet, PacketShape, packet_name};
//!
//! let shape = PacketShape::new(4, 2, 3);
//! let packet = Packet::with_shape(vec![0u8; 24], shape)?;
//! assert_eq!(packet.len(), 24);
//! assert_eq!(packet_name(42, 1000), "000042");
//! # Ok::<(), packetflow::PipelineError>(())
//! ```

mod enqueued;
mod packet;

pub use enqueued::Enqueued;
pub use packet::{Packet, PacketShape, packet_name};
