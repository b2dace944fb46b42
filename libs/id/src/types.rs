//! Typed ID definitions.

use std::fmt;
use std::str::FromStr;

use crate::{define_uuid_id, IdError};

// =============================================================================
// Jobs
// =============================================================================

define_uuid_id!(JobId);

// =============================================================================
// Tenants
// =============================================================================

/// Tenant (application) ID.
///
/// Assigned by the operator in configuration. The value is opaque to the
/// system but is used verbatim as a directory name, so only a conservative
/// character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// Maximum accepted length.
    pub const MAX_LEN: usize = 128;

    /// Parses and validates a tenant ID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        if s.len() > Self::MAX_LEN {
            return Err(IdError::TooLong {
                len: s.len(),
                max: Self::MAX_LEN,
            });
        }

        if s == "." || s == ".." {
            return Err(IdError::Reserved(s.to_string()));
        }

        if let Some(found) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(IdError::InvalidCharacter {
                id: s.to_string(),
                found,
            });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for TenantId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for TenantId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_job_id_is_hyphenated_v4() {
        let id = JobId::new();
        let s = id.to_string();
        assert_eq!(s.len(), 36);
        assert_eq!(id.uuid().get_version_num(), 4);
    }

    #[test]
    fn test_job_id_distinct() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_job_id_empty() {
        let result: Result<JobId, _> = "".parse();
        assert!(matches!(result.unwrap_err(), IdError::Empty));
    }

    #[test]
    fn test_job_id_invalid_uuid() {
        let result: Result<JobId, _> = "not-a-uuid".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidUuid(_)));
    }

    #[test]
    fn test_job_id_json_roundtrip() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let parsed: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_tenant_id_accepts_uuid_and_short_names() {
        assert!(TenantId::parse("T1").is_ok());
        assert!(TenantId::parse("3f0d2c1e-9d38-4bd7-8a4e-4f3b8c7d2a10").is_ok());
        assert!(TenantId::parse("team_a.prod").is_ok());
    }

    #[test]
    fn test_tenant_id_rejects_path_components() {
        assert!(matches!(
            TenantId::parse("..").unwrap_err(),
            IdError::Reserved(_)
        ));
        assert!(matches!(
            TenantId::parse("a/b").unwrap_err(),
            IdError::InvalidCharacter { found: '/', .. }
        ));
        assert!(matches!(TenantId::parse("").unwrap_err(), IdError::Empty));
    }

    #[test]
    fn test_tenant_id_too_long() {
        let long = "a".repeat(TenantId::MAX_LEN + 1);
        assert!(matches!(
            TenantId::parse(&long).unwrap_err(),
            IdError::TooLong { .. }
        ));
    }

    #[test]
    fn test_tenant_id_deserialize_validates() {
        let ok: TenantId = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(ok.as_str(), "T1");
        assert!(serde_json::from_str::<TenantId>("\"a b\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_tenant_ids_roundtrip(s in "[A-Za-z0-9_-][A-Za-z0-9._-]{0,63}") {
            let id = TenantId::parse(&s).unwrap();
            prop_assert_eq!(id.to_string(), s);
        }

        #[test]
        fn prop_tenant_ids_never_contain_separators(s in "\\PC{1,64}") {
            if let Ok(id) = TenantId::parse(&s) {
                prop_assert!(!id.as_str().contains('/'));
                prop_assert!(!id.as_str().contains('\\'));
                prop_assert!(id.as_str() != "..");
            }
        }
    }
}
