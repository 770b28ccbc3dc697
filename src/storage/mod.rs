//! Durable storage: framed binary files, the id mapping commit point,
//! and per-chunk record files.

pub mod framed;
pub mod id_map;
pub mod record;

pub use framed::{FrameError, read_framed, write_framed};
pub use id_map::IdMap;
pub use record::{Record, RecordStore};
