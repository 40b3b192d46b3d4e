use crate::id::ObjectId;

/// Tag mixed into the hash so commits and blobs never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectTag {
    Commit = 1,
    Blob = 2,
}

/// Domain-separated BLAKE3 hash: "gavel\0" || tag || version || payload
pub fn content_hash(tag: ObjectTag, payload: &[u8]) -> ObjectId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"gavel\0");
    hasher.update(&[tag as u8]);
    hasher.update(&[1u8]); // version
    hasher.update(payload);
    let hash = hasher.finalize();
    ObjectId::from_bytes(*hash.as_bytes())
}

/// Hash of raw file content.
pub fn blob_id(data: &[u8]) -> ObjectId {
    content_hash(ObjectTag::Blob, data)
}
