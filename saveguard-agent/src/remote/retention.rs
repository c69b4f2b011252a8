//! Size-bounded retention for the remote repository.
//!
//! Once the local clone grows past the ceiling the whole remote history is
//! destroyed and recreated empty. Bounding storage wins over keeping history.

use crate::utils::{Result, SaveGuardError};

/// 900 MiB
pub const RETENTION_CEILING_BYTES: u64 = 900 * 1024 * 1024;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    ceiling_bytes: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ceiling_bytes: RETENTION_CEILING_BYTES,
        }
    }
}

impl RetentionPolicy {
    /// Policy with a custom ceiling. Production code uses [`RetentionPolicy::default`].
    pub fn with_ceiling(ceiling_bytes: u64) -> Self {
        Self { ceiling_bytes }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// `SizeCeilingExceeded` when `size_bytes` is strictly above the ceiling.
    pub fn check(&self, size_bytes: u64) -> Result<()> {
        if size_bytes > self.ceiling_bytes {
            return Err(SaveGuardError::SizeCeilingExceeded {
                size: size_bytes,
                ceiling: self.ceiling_bytes,
            });
        }
        Ok(())
    }

    /// "123 / 900 MB." style usage summary
    pub fn describe_usage(&self, size_bytes: u64) -> String {
        format!(
            "{} / {} MB.",
            size_bytes / MIB,
            self.ceiling_bytes / MIB
        )
    }
}
