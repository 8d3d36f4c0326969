//! [`BlobStore`](tether_proto::BlobStore) implementations.
//!
//! References have the form `folder/name`, both segments sanitized on write
//! and re-validated on every lookup.

mod file;
mod memory;

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;

use tether_proto::{BlobError, BlobReference, CorrelationId};

use crate::helpers::sanitize_segment;

/// Build a fresh reference under `folder`. A random suffix keeps concurrent
/// writers with the same suggested name apart.
fn new_reference(suggested_name: &str, folder: &str) -> BlobReference {
    let suffix = CorrelationId::random();
    let name: String = sanitize_segment(suggested_name).chars().take(80).collect();
    BlobReference::new(format!(
        "{}/{}-{}",
        sanitize_segment(folder),
        name,
        &suffix.as_str()[..12]
    ))
}

/// Split a reference into its two segments, rejecting anything that would not
/// have been produced by [`new_reference`].
fn split_reference(reference: &BlobReference) -> Result<(&str, &str), BlobError> {
    let invalid = || BlobError::InvalidReference(reference.to_string());
    let (folder, name) = reference.as_str().split_once('/').ok_or_else(invalid)?;
    if name.contains('/') || sanitize_segment(folder) != folder || sanitize_segment(name) != name {
        return Err(invalid());
    }
    Ok((folder, name))
}
