//! # Binary Stream Format
//!
//! A capture is a payload header followed by frames, all little-endian:
//!
//! ```text
//! [ header: magic(8) version(2) arch(2) size(4) tid(4) backend(2) reserved(2) ]
//! [ frame 0: addr(8) line(8) offset(8) symbol\0 filename\0 reg_count(2) [reg_id(2) value(8)]* ]
//! [ frame 1: ... ]
//! ```
//!
//! `size` in the header is the end of valid data; bytes beyond it are not
//! part of the stream.
//!
//! ## Signal safety
//!
//! [`Writer`] and [`Reader`] never allocate, lock or log, so they can run
//! inside a signal handler. A frame write either lands completely or not at
//! all: a capture cut short by a full buffer ends at the last complete frame.

pub mod buffer;
pub mod codec;
pub mod frame;
pub mod reader;
pub mod writer;

pub use buffer::{Buffer, PROLOGUE_SIZE};
pub use codec::{PayloadHeader, HEADER_SIZE, MAGIC, REGISTER_ENTRY_SIZE, VERSION};
pub use frame::Frame;
pub use reader::Reader;
pub use writer::Writer;
