//! Formatting helpers for correlating retained objects against external
//! heap dumps.

use crate::adapter::ObjectRef;

/// Hex-string representation of an object's raw identity, e.g.
/// `"0x7f2a1c000010"`. Stable for a non-moving window; changes after
/// compaction consistently with [`crate::adapter::RuntimeAdapter::relocate`]
/// applied to the same reference.
pub fn address_of(object: ObjectRef) -> String {
    format!("{:#x}", object.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_as_lowercase_hex_with_prefix() {
        assert_eq!(address_of(ObjectRef(0x7f2a1c000010)), "0x7f2a1c000010");
    }

    #[test]
    fn zero_is_0x0() {
        assert_eq!(address_of(ObjectRef(0)), "0x0");
    }
}
