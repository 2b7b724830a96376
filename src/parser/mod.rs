//! C2 Filename Parser.

pub mod filename;
