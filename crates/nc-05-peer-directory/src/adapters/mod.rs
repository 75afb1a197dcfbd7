//! Node-info file format.

pub mod node_file;

pub use node_file::NodeInfoFile;
