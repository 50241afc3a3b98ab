use crate::error::{ViewCountError, ViewCountResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a content item. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ContentId(u64);

impl ContentId {
    pub fn new(raw: u64) -> ViewCountResult<Self> {
        if raw == 0 {
            return Err(ViewCountError::InvalidArgument(
                "content id must be positive".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ContentId {
    type Error = ViewCountError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl TryFrom<i64> for ContentId {
    type Error = ViewCountError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        if raw <= 0 {
            return Err(ViewCountError::InvalidArgument(format!(
                "content id must be positive, got {}",
                raw
            )));
        }
        Self::new(raw as u64)
    }
}

impl From<ContentId> for u64 {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl FromStr for ContentId {
    type Err = ViewCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u64 = s
            .trim()
            .parse()
            .map_err(|_| ViewCountError::ParseError(format!("invalid content id '{}'", s)))?;
        Self::new(raw)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable per-visitor identifier used as a dedup key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitorId(String);

impl VisitorId {
    pub fn new(raw: impl Into<String>) -> ViewCountResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ViewCountError::InvalidArgument(
                "visitor id must not be empty".to_string(),
            ));
        }
        Ok(Self(raw))
    }

    /// Ids built by the resolver always carry a non-empty prefix.
    pub(crate) fn prefixed(raw: String) -> Self {
        debug_assert!(!raw.is_empty());
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_rejects_zero() {
        assert!(ContentId::new(0).is_err());
        assert_eq!(ContentId::new(42).unwrap().get(), 42);
    }

    #[rstest::rstest]
    #[case(-1)]
    #[case(0)]
    #[case(i64::MIN)]
    fn test_content_id_rejects_non_positive_signed(#[case] raw: i64) {
        let err = ContentId::try_from(raw).unwrap_err();
        assert!(matches!(err, ViewCountError::InvalidArgument(_)));
    }

    #[test]
    fn test_content_id_parse() {
        assert_eq!(" 17 ".parse::<ContentId>().unwrap().get(), 17);
        assert!("abc".parse::<ContentId>().is_err());
        assert!("0".parse::<ContentId>().is_err());
    }

    #[test]
    fn test_content_id_serde() {
        let id: ContentId = serde_json::from_str("7").unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        assert!(serde_json::from_str::<ContentId>("0").is_err());
    }

    #[test]
    fn test_visitor_id_rejects_blank() {
        assert!(VisitorId::new("").is_err());
        assert!(VisitorId::new("   ").is_err());
        assert_eq!(VisitorId::new("user:9").unwrap().as_str(), "user:9");
    }
}
