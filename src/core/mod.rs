// Core modules: byte sources, dialects, scanning, sharding and assembly.
pub mod assemble;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod field;
pub mod index;
pub mod options;
pub mod progress;
pub mod scan;
pub mod session;
pub mod shard;
pub mod sniff;
pub mod source;
pub mod table;
