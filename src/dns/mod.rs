mod buffer;
mod packet;
mod writer;

pub use buffer::PacketBuffer;
pub use packet::{canonical_fqdn, DnsPacket, Proto, QueryType};
pub use writer::FailedQueryWriter;
