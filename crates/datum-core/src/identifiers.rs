//! Dataset and registry identifiers
//!
//! An [`Identifier`] is the permanent address of a dataset: a publisher
//! namespace and a dataset slug written `namespace/slug`. Namespaces may
//! contain dots so domain-style publishers (`norge.no`) can use their domain.
//! Both parts are lowercase and immutable once registered.

use crate::errors::{DatumError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of a namespace or slug segment
pub const MAX_SEGMENT_LEN: usize = 64;

fn validate_segment(kind: &str, value: &str, allow_dot: bool) -> Result<()> {
    if value.is_empty() {
        return Err(DatumError::invalid_format(format!("{kind} must not be empty")));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(DatumError::invalid_format(format!(
            "{kind} '{value}' exceeds {MAX_SEGMENT_LEN} characters"
        )));
    }

    let is_edge = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let is_inner = |c: char| is_edge(c) || c == '-' || (allow_dot && c == '.');

    let first = value.chars().next();
    let last = value.chars().last();
    if !first.is_some_and(is_edge) || !last.is_some_and(is_edge) {
        return Err(DatumError::invalid_format(format!(
            "{kind} '{value}' must start and end with a lowercase letter or digit"
        )));
    }
    if let Some(bad) = value.chars().find(|c| !is_inner(*c)) {
        return Err(DatumError::invalid_format(format!(
            "{kind} '{value}' contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

/// Permanent dataset address: `namespace/slug`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    namespace: String,
    slug: String,
}

impl Identifier {
    /// Build an identifier from its parts, validating both
    pub fn new(namespace: impl Into<String>, slug: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let slug = slug.into();
        validate_segment("namespace", &namespace, true)?;
        validate_segment("slug", &slug, false)?;
        Ok(Self { namespace, slug })
    }

    /// Parse the `namespace/slug` string form
    pub fn parse(s: &str) -> Result<Self> {
        let (namespace, slug) = s.split_once('/').ok_or_else(|| {
            DatumError::invalid_format(format!("identifier '{s}' must be 'namespace/slug'"))
        })?;
        if slug.contains('/') {
            return Err(DatumError::invalid_format(format!(
                "identifier '{s}' has too many segments"
            )));
        }
        Self::new(namespace, slug)
    }

    /// Publisher namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Dataset slug
    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.slug)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl FromStr for Identifier {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Which release of an identifier to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// Newest publication that has not been retracted
    #[default]
    Latest,
    /// A specific version number
    Exact(u64),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Exact(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "latest" {
            return Ok(VersionSelector::Latest);
        }
        s.parse::<u64>()
            .map(VersionSelector::Exact)
            .map_err(|_| DatumError::invalid_format(format!("version '{s}' is not a number or 'latest'")))
    }
}

/// An identifier with an optional version: `namespace/slug[@version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentifierRef {
    /// Dataset being referenced
    pub identifier: Identifier,
    /// Version to resolve
    pub version: VersionSelector,
}

impl IdentifierRef {
    /// Parse `namespace/slug`, `namespace/slug@3` or `namespace/slug@latest`
    pub fn parse(s: &str) -> Result<Self> {
        let (id, version) = match s.split_once('@') {
            Some((id, v)) => (id, v.parse()?),
            None => (s, VersionSelector::Latest),
        };
        Ok(Self {
            identifier: Identifier::parse(id)?,
            version,
        })
    }
}

impl fmt::Display for IdentifierRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            VersionSelector::Latest => write!(f, "{}", self.identifier),
            VersionSelector::Exact(v) => write!(f, "{}@{v}", self.identifier),
        }
    }
}

impl FromStr for IdentifierRef {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Identity of one registry instance in the federation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryId(pub Uuid);

impl RegistryId {
    /// Generate a fresh random registry id
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for tests and fixtures
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegistryId {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DatumError::invalid_format(format!("registry id '{s}': {e}")))
    }
}

impl From<Uuid> for RegistryId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = Identifier::parse("acme/report").unwrap();
        assert_eq!(id.namespace(), "acme");
        assert_eq!(id.slug(), "report");
        assert_eq!(id.to_string(), "acme/report");

        let id = Identifier::parse("norge.no/census-2024").unwrap();
        assert_eq!(id.namespace(), "norge.no");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in [
            "",
            "acme",
            "acme/",
            "/report",
            "Acme/report",
            "acme/re.port",
            "acme/report/extra",
            "-acme/report",
            "acme/report-",
            "acme./report",
            "ac me/report",
        ] {
            let err = Identifier::parse(bad).unwrap_err();
            assert!(matches!(err, DatumError::InvalidFormat { .. }), "{bad}");
        }
    }

    #[test]
    fn test_segment_length_limit() {
        let long = "a".repeat(MAX_SEGMENT_LEN + 1);
        assert!(Identifier::new("acme", long).is_err());
        assert!(Identifier::new("acme", "a".repeat(MAX_SEGMENT_LEN)).is_ok());
    }

    #[test]
    fn test_reference_forms() {
        let r = IdentifierRef::parse("acme/report@3").unwrap();
        assert_eq!(r.version, VersionSelector::Exact(3));
        assert_eq!(r.to_string(), "acme/report@3");

        let r = IdentifierRef::parse("acme/report@latest").unwrap();
        assert_eq!(r.version, VersionSelector::Latest);

        let r = IdentifierRef::parse("acme/report").unwrap();
        assert_eq!(r.version, VersionSelector::Latest);

        assert!(IdentifierRef::parse("acme/report@v1").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = Identifier::parse("acme/report").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"acme/report\"");
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<Identifier>("\"ACME/x\"").is_err());
    }

    #[test]
    fn test_registry_id_round_trip() {
        let id = RegistryId::from_u128(42);
        let parsed: RegistryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
