//! Deterministic sandbox naming.
//!
//! Every identity maps to exactly one runtime name, so "does this user have
//! a sandbox" is always answered by asking the runtime about that name.

use crate::error::{SandboxError, SandboxResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest name accepted by the container runtimes (hostname limit).
pub const MAX_NAME_LEN: usize = 63;

/// Hex characters of the identity checksum appended to every name.
const CHECKSUM_LEN: usize = 12;

/// Longest sanitized prefix that still leaves room for the checksum.
pub const MAX_PREFIX_LEN: usize = MAX_NAME_LEN - CHECKSUM_LEN - 2;

/// Name of a sandbox as known to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxName(String);

impl SandboxName {
    /// Wrap a name already known to the runtime (e.g. a container-level
    /// reference supplied by a client). The name is not re-derived.
    pub fn from_runtime(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SandboxName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the sandbox name for an identity.
///
/// The readable part is the identity lowercased, with characters outside
/// `[a-z0-9_.-]` replaced by `-` and cut to fit [`MAX_NAME_LEN`]. A checksum
/// of the untouched identity is always appended, so identities that differ
/// only in case or share a long prefix still get distinct names.
pub fn name_for(prefix: &str, identity: &str) -> SandboxResult<SandboxName> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(SandboxError::InvalidIdentity(
            "identity must not be empty".to_string(),
        ));
    }

    let prefix: String = sanitize(prefix).chars().take(MAX_PREFIX_LEN).collect();
    let prefix = if prefix.is_empty() {
        crate::config::DEFAULT_NAME_PREFIX.to_string()
    } else {
        prefix
    };
    let checksum = checksum(identity);

    // prefix + '-' + body + '-' + checksum
    let budget = MAX_NAME_LEN.saturating_sub(prefix.len() + CHECKSUM_LEN + 2);
    let body: String = sanitize(identity).chars().take(budget).collect();
    let body = body.trim_matches('-');

    let name = if body.is_empty() {
        format!("{prefix}-{checksum}")
    } else {
        format!("{prefix}-{body}-{checksum}")
    };

    Ok(SandboxName(name))
}

/// Reject a name prefix that cannot fit a runtime name.
pub fn validate_prefix(prefix: &str) -> SandboxResult<()> {
    let len = sanitize(prefix).len();
    if len > MAX_PREFIX_LEN {
        return Err(SandboxError::Config(format!(
            "name_prefix is {len} characters, at most {MAX_PREFIX_LEN} allowed"
        )));
    }
    Ok(())
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn checksum(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..CHECKSUM_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STELLAR_KEY: &str = "GBRPYHIL2CI3FNQ4BXLFMNDLFJUNPU2HY3ZMFSHONUCEOASW7QC7OX2H";

    #[test]
    fn test_name_is_deterministic() {
        let a = name_for("keybox", STELLAR_KEY).unwrap();
        let b = name_for("keybox", STELLAR_KEY).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_name_shape() {
        let name = name_for("keybox", STELLAR_KEY).unwrap();
        let s = name.as_str();
        assert!(s.starts_with("keybox-gbrpyhil"));
        assert!(s.len() <= MAX_NAME_LEN);
        assert!(s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c)));
    }

    #[test]
    fn test_case_variants_do_not_collide() {
        let upper = name_for("keybox", "AbC").unwrap();
        let lower = name_for("keybox", "abc").unwrap();
        assert_ne!(upper, lower);
        assert!(upper.as_str().starts_with("keybox-abc-"));
    }

    #[test]
    fn test_long_shared_prefix_does_not_collide() {
        let base = "x".repeat(200);
        let a = name_for("keybox", &format!("{base}1")).unwrap();
        let b = name_for("keybox", &format!("{base}2")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_identity_is_trimmed() {
        assert_eq!(
            name_for("keybox", "  abc ").unwrap(),
            name_for("keybox", "abc").unwrap()
        );
    }

    #[test]
    fn test_unusual_characters() {
        let name = name_for("keybox", "héllo wörld/$(rm)").unwrap();
        assert!(!name.as_str().contains(' '));
        assert!(!name.as_str().contains('$'));

        let only_symbols = name_for("keybox", "@@@").unwrap();
        assert!(only_symbols.as_str().starts_with("keybox-"));
        assert_eq!(only_symbols.as_str().len(), "keybox-".len() + CHECKSUM_LEN);
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(matches!(
            name_for("keybox", ""),
            Err(SandboxError::InvalidIdentity(_))
        ));
        assert!(matches!(
            name_for("keybox", "   "),
            Err(SandboxError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_long_prefix_is_cut_to_fit() {
        let prefix = "p".repeat(60);

        let name = name_for(&prefix, STELLAR_KEY).unwrap();

        assert!(name.as_str().len() <= MAX_NAME_LEN);
        assert!(name.as_str().starts_with(&"p".repeat(MAX_PREFIX_LEN)));
        assert_ne!(name, name_for(&prefix, "GOTHER").unwrap());
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("keybox").is_ok());
        assert!(validate_prefix(&"p".repeat(MAX_PREFIX_LEN)).is_ok());
        assert!(matches!(
            validate_prefix(&"p".repeat(MAX_PREFIX_LEN + 1)),
            Err(SandboxError::Config(_))
        ));
    }

    #[test]
    fn test_many_distinct_identities() {
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            let name = name_for("keybox", &format!("G{i:055}")).unwrap();
            assert!(seen.insert(name));
        }
    }
}
