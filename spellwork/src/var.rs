//! Variable naming rules.
//!
//! User variables share one namespace with script builtins, so their names
//! are restricted by [`validate_name`] before every write.

/// Characters a user-scoped variable name may not contain.
pub const FORBIDDEN_NAME_CHARS: &str = "/()[]\\.^$*+?|{}";

/// Returns `true` if `name` can be used as a user-scoped variable name.
pub fn validate_name(name: &str) -> bool {
    !name.contains(|c| FORBIDDEN_NAME_CHARS.contains(c))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_name("spell_dc"));
        assert!(validate_name("my-var"));
        for bad in ["a.b", "x(y)", "a/b", "q?", "{x}", "a\\b", "p|q", "a^", "$x", "a*", "a+", "[0]"] {
            assert!(!validate_name(bad), "{bad}");
        }
    }
}
