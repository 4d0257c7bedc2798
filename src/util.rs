//! Shared utility modules used across segmerge components.

pub mod varint;
