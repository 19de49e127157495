//! Low-level helper utilities.

pub mod archive;
pub mod checksums;
pub mod hash;
pub mod mime;
pub mod rules;
pub mod templates;
