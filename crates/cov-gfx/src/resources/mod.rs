pub mod buffer;
pub mod handles;
