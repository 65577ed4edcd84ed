//! Demographic key types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Gender bucket of a demographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Self::Male),
            "F" => Ok(Self::Female),
            other => Err(AppError::InvalidInput(format!("unknown gender '{}'", other))),
        }
    }
}

/// Age bucket of a demographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "18-19")]
    Age18To19,
    #[serde(rename = "20-29")]
    Age20To29,
    #[serde(rename = "30-39")]
    Age30To39,
    #[serde(rename = "40-49")]
    Age40To49,
    #[serde(rename = "50+")]
    Age50Plus,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::Age18To19,
        AgeGroup::Age20To29,
        AgeGroup::Age30To39,
        AgeGroup::Age40To49,
        AgeGroup::Age50Plus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Age18To19 => "18-19",
            Self::Age20To29 => "20-29",
            Self::Age30To39 => "30-39",
            Self::Age40To49 => "40-49",
            Self::Age50Plus => "50+",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|age| age.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown age group '{}'", s)))
    }
}

/// A (gender, age) pair selecting one row of the weight/bias tables.
///
/// Either side may be absent, meaning "all genders" or "all ages".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DemographicKey {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: Option<AgeGroup>,
}

impl DemographicKey {
    pub fn new(gender: Option<Gender>, age: Option<AgeGroup>) -> Self {
        Self { gender, age }
    }

    /// Parse optional labels such as `("F", "50+")`. Empty or `"None"` means absent.
    pub fn parse(gender: Option<&str>, age: Option<&str>) -> Result<Self, AppError> {
        let present = |s: &&str| !s.is_empty() && *s != "None";
        Ok(Self {
            gender: gender.filter(present).map(str::parse::<Gender>).transpose()?,
            age: age.filter(present).map(str::parse::<AgeGroup>).transpose()?,
        })
    }
}

impl fmt::Display for DemographicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gender {
            Some(g) => write!(f, "{},", g)?,
            None => f.write_str("None,")?,
        }
        match self.age {
            Some(a) => write!(f, "{}", a),
            None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let key = DemographicKey::parse(Some("F"), Some("50+")).unwrap();
        assert_eq!(key, DemographicKey::new(Some(Gender::Female), Some(AgeGroup::Age50Plus)));
        assert_eq!(key.to_string(), "F,50+");

        let all = DemographicKey::parse(None, Some("None")).unwrap();
        assert_eq!(all, DemographicKey::default());
        assert_eq!(all.to_string(), "None,None");

        assert!(DemographicKey::parse(Some("X"), None).is_err());
        assert!(DemographicKey::parse(None, Some("60-69")).is_err());
    }

    #[test]
    fn test_serde_labels() {
        let key: DemographicKey =
            serde_json::from_str(r#"{"gender":"M","age":"20-29"}"#).unwrap();
        assert_eq!(key, DemographicKey::new(Some(Gender::Male), Some(AgeGroup::Age20To29)));

        let key: DemographicKey = serde_json::from_str(r#"{"gender":null}"#).unwrap();
        assert_eq!(key, DemographicKey::default());
    }
}
