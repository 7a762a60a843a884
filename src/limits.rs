/// Largest payload accepted for delivery (50 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Validates a fully buffered payload against the configured byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGate {
    max_bytes: u64,
}

impl SizeGate {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// True iff `byte_len` fits within the limit (inclusive).
    pub fn check(&self, byte_len: u64) -> bool {
        byte_len <= self.max_bytes
    }

    /// Limit expressed in whole mebibytes, for user-facing text.
    pub fn max_mib(&self) -> u64 {
        self.max_bytes / (1024 * 1024)
    }
}

impl Default for SizeGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_inclusive() {
        let gate = SizeGate::default();
        assert!(gate.check(DEFAULT_MAX_BYTES));
        assert!(!gate.check(DEFAULT_MAX_BYTES + 1));
    }

    #[test]
    fn empty_payload_passes() {
        assert!(SizeGate::new(0).check(0));
        assert!(!SizeGate::new(0).check(1));
    }

    #[test]
    fn max_mib_rounds_down() {
        assert_eq!(SizeGate::default().max_mib(), 50);
        assert_eq!(SizeGate::new(3 * 1024 * 1024 + 5).max_mib(), 3);
    }
}
