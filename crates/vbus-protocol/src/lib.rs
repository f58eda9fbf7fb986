//! RESOL VBUS protocol decoder
//!
//! This crate decodes the serial bus protocol spoken by RESOL solar-thermal
//! controllers (and compatible units) into named, unit-annotated readings.
//! Messages are delimited by a sync byte, carry a fixed 9-byte header and a
//! sequence of 6-byte sub-frames whose high bits travel in a separate septet
//! byte. A specification catalog (converted from the RESOL Service Center
//! XML) maps source/destination/command triplets to field layouts.

pub mod decode;
pub mod frame;
pub mod framing;
pub mod spec;
pub mod transport;
pub mod types;

pub use decode::{Decoded, DecodeStats, Decoder, Readings};
pub use frame::{assemble_payload, integrate_septet, read_signed, Header, ProtocolVersion};
pub use framing::{split_frames, SplitPolicy, SYNC_BYTE};
pub use spec::{DeviceSpec, FieldSpec, PacketSpec, SpecCatalog, SpecError};
pub use transport::{TransportConfig, TransportError, VBusConnection};
pub use types::ProtocolError;
