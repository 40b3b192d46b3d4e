//! Opaque change sort keys: lexicographic order equals
//! (last-updated, change id) order.

/// Minutes are counted from Wed Oct 1 00:00:00 2008 UTC; the encoding
/// overruns approximately 4,085 years later.
const EPOCH_OFFSET_SECS: u64 = 1_222_819_200;

/// 16 hex chars: minutes since the offset in the high 8, the id in the low 8.
pub fn sort_key(last_updated_ms: u64, id: u32) -> String {
    let secs = (last_updated_ms / 1000).saturating_sub(EPOCH_OFFSET_SECS);
    format!("{:08x}{:08x}", (secs / 60) as u32, id)
}
