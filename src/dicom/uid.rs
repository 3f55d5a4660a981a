//! DICOM UID generation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Root for UUID-derived UIDs (PS3.5 B.2).
pub const UUID_ROOT: &str = "2.25";

/// Source of new unique identifiers.
pub trait UidGenerator: Send + Sync {
    /// Produce a new UID.
    fn generate(&self) -> String;
}

/// `2.25.<random 128-bit integer>` UIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUid;

impl UidGenerator for RandomUid {
    fn generate(&self) -> String {
        format!("{}.{}", UUID_ROOT, rand::random::<u128>())
    }
}

/// `<root>.<n>` UIDs counting up from 1, for reproducible output.
#[derive(Debug)]
pub struct SequentialUid {
    root: String,
    counter: AtomicU64,
}

impl SequentialUid {
    /// Count under `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl UidGenerator for SequentialUid {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}.{}", self.root, n)
    }
}
