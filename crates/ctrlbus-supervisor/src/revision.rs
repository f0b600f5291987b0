use std::fmt;

use serde::Deserialize;

use crate::error::{Result, SupervisorError};

/// Package revision reported by a driver or board: `major.minor.sub`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(default)]
pub struct Revision {
    pub major: u32,
    pub minor: u32,
    pub sub: u32,
}

impl Revision {
    pub fn new(major: u32, minor: u32, sub: u32) -> Self {
        Self { major, minor, sub }
    }

    /// Read the first three acknowledge parameters. A missing `sub` reads as 0.
    pub fn from_params(params: &[String]) -> Result<Self> {
        let invalid = || SupervisorError::InvalidRevision(params.to_vec());
        let field = |i: usize| -> Result<u32> {
            params
                .get(i)
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())
        };
        let sub = match params.get(2) {
            Some(_) => field(2)?,
            None => 0,
        };
        Ok(Self::new(field(0)?, field(1)?, sub))
    }

    /// Major and minor must match; `sub` is informational.
    pub fn is_compatible_with(&self, expected: &Revision) -> bool {
        self.major == expected.major && self.minor == expected.minor
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_three_fields() {
        let rev = Revision::from_params(&params(&["2", "5", "1"])).unwrap();
        assert_eq!(rev, Revision::new(2, 5, 1));
        assert_eq!(rev.to_string(), "2.5.1");
    }

    #[test]
    fn sub_is_optional() {
        let rev = Revision::from_params(&params(&["1", "0"])).unwrap();
        assert_eq!(rev, Revision::new(1, 0, 0));
    }

    #[test]
    fn rejects_missing_or_non_numeric_fields() {
        assert!(matches!(
            Revision::from_params(&params(&["1"])),
            Err(SupervisorError::InvalidRevision(_))
        ));
        assert!(Revision::from_params(&params(&["1", "x", "0"])).is_err());
        assert!(Revision::from_params(&params(&["1", "2", "-3"])).is_err());
    }

    #[test]
    fn sub_does_not_affect_compatibility() {
        let expected = Revision::new(2, 5, 0);
        assert!(Revision::new(2, 5, 0).is_compatible_with(&expected));
        assert!(Revision::new(2, 5, 9).is_compatible_with(&expected));
        assert!(!Revision::new(2, 6, 0).is_compatible_with(&expected));
        assert!(!Revision::new(3, 5, 0).is_compatible_with(&expected));
    }

    #[test]
    fn deserializes_with_defaults() {
        let rev: Revision = serde_json::from_str(r#"{"major": 4, "minor": 1}"#).unwrap();
        assert_eq!(rev, Revision::new(4, 1, 0));
    }
}
