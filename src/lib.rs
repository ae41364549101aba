//! Serialize structured debug-information trees into DWARF v4 section
//! buffers, and package those buffers into ELF objects.
//!
//! The input is a tree of DIEs (debugging information entries) per compile
//! unit, built with [`DieTree`]. [`encode`] turns a list of such trees into
//! the classic section blobs (`.debug_info`, `.debug_abbrev`, `.debug_str`,
//! `.debug_loc`, `.debug_line`, `.debug_ranges`); [`elf`] wraps them into an
//! object file.

pub mod arch;
pub mod dwarf;
pub mod elf;
pub mod encode;
pub mod expr;
pub mod leb;
pub mod line;

pub use arch::{Arch, Endian};
pub use dwarf::{AttrValue, Die, DieId, DieTree, LocationEntry, RangeEntry};
pub use encode::{encode, Encoder, Sections};
pub use expr::{Op, OpArg};
pub use line::LineState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

// Everything that can abort an encode. None of these are retried; the
// buffers built so far are simply abandoned.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // A DIE was referenced through an attribute but never attached as a
    // descendant of the unit being written.
    #[error("reference to DIE(s) not present in the unit tree: {0:?}")]
    DanglingReference(Vec<DieId>),

    #[error("no encoding implemented for {0}")]
    Unsupported(String),

    // .debug_str entries are NUL-terminated, so the strings themselves
    // must not contain NUL.
    #[error("string contains an embedded NUL byte")]
    InvalidString,

    #[error("invalid line program: {0}")]
    InvalidLineProgram(String),

    // The attribute value variant maps to no DWARF form (for example an
    // empty expression or an empty range list).
    #[error("attribute {attr:#x}: cannot pick a form for {kind} value")]
    UnclassifiableValue { attr: u64, kind: &'static str },
}
