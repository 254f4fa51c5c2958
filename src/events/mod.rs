mod poller;
mod writer;

pub use poller::{FollowError, Poller};
pub use writer::JsonFileWriter;
