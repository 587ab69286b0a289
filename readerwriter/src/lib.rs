//! Binary reader/writer interfaces used by the wire formats.
//! All multi-byte integers are encoded big-endian.
mod codable;
mod reader;
mod writer;

pub use codable::{Decodable, Encodable, ExactSizeEncodable};
pub use reader::{ReadError, Reader};
pub use writer::{WriteError, Writer};
