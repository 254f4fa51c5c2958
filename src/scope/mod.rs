mod groups;

pub use groups::{Group, GroupError, Groups};
