//! Binary building blocks shared by the MRS and SRS rule-set formats.
//!
//! # Layout conventions
//!
//! ```text
//! uvarint        unsigned LEB128, at most 10 bytes
//! i64/u64 BE     fixed 8-byte big-endian integers
//! succinct set   [version=1][leaves][label bitmap][labels]
//! ip range set   [version=1][count][(from, to)...]
//! ```
//!
//! The two formats differ only in how lengths and addresses are encoded; see
//! the `write_*`/`read_*` pairs on [`SuccinctSet`] and [`IpRangeSet`].

pub mod codec;
pub mod ipset;
pub mod succinct;

pub use codec::ByteReader;
pub use ipset::IpRangeSet;
pub use succinct::SuccinctSet;
