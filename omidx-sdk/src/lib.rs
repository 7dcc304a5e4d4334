//! Shared wire objects for omidx.
//!
//! Everything in this crate is plain data: the event records delivered by a
//! chain-log source, the hex byte strings they carry, and the provenance
//! coordinates used to address and resume a replay.

#![forbid(unsafe_code)]

pub mod objects;
