//! Page and envelope locators.

use serde::{Deserialize, Serialize};

/// Where a committed page (or envelope) lives on storage.
///
/// Locators are assigned by the sink that performs the durable write. Layers that only buffer
/// return `Locator::placeholder()`, which callers must not interpret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// Byte offset within the sink's storage
    pub position: u64,

    /// Number of bytes occupied on storage
    pub bytes_on_storage: u32,
}

impl Locator {
    pub fn new(position: u64, bytes_on_storage: u32) -> Self {
        Self {
            position,
            bytes_on_storage,
        }
    }

    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::default()
    }

    /// First byte past the located range, saturating at `u64::MAX`
    pub fn end(&self) -> u64 {
        self.position.saturating_add(self.bytes_on_storage as u64)
    }

    /// First byte past the located range, `None` if it does not fit a `u64`
    pub fn checked_end(&self) -> Option<u64> {
        self.position.checked_add(self.bytes_on_storage as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        assert!(Locator::placeholder().is_placeholder());
        assert!(!Locator::new(0, 8).is_placeholder());
    }

    #[test]
    fn test_end_near_u64_max() {
        assert_eq!(Locator::new(10, 5).checked_end(), Some(15));
        let far = Locator::new(u64::MAX - 1, 4);
        assert_eq!(far.checked_end(), None);
        assert_eq!(far.end(), u64::MAX);
    }
}
