pub mod event;
pub mod hex_bytes;
pub mod provenance;

pub use event::{Event, ParamValue};
pub use hex_bytes::{HexBytes, HexParseError};
pub use provenance::{Cursor, Provenance};
