//! Typed channels (spec.md §3, §4.4).

pub mod buffered;
pub mod unbuffered;

pub use buffered::{buffered, BufferedChannel};
pub use unbuffered::{unbuffered, Channel};
