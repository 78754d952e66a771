use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LengthParseError;

const MM_PER_INCH: f64 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Length(f64);

impl Length {
    pub const ZERO: Self = Self(0.0);

    pub const fn mm(v: f64) -> Self {
        Self(v)
    }
    pub fn cm(v: f64) -> Self {
        Self(v * 10.0)
    }
    pub fn m(v: f64) -> Self {
        Self(v * 1000.0)
    }
    pub fn inches(v: f64) -> Self {
        Self(v * MM_PER_INCH)
    }

    pub fn as_mm(self) -> f64 {
        self.0
    }
    pub fn as_inches(self) -> f64 {
        self.0 / MM_PER_INCH
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mm", self.0)
    }
}

impl FromStr for Length {
    type Err = LengthParseError;

    /// Accepts a number followed by `mm`, `cm`, `m`, `in` or `"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c.is_ascii_alphabetic() || c == '"')
            .ok_or_else(|| LengthParseError::MissingUnit(s.to_string()))?;
        let (value, unit) = s.split_at(split);
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|source| LengthParseError::InvalidNumber {
                input: s.to_string(),
                source,
            })?;
        match unit.trim() {
            "mm" => Ok(Self::mm(value)),
            "cm" => Ok(Self::cm(value)),
            "m" => Ok(Self::m(value)),
            "in" | "\"" => Ok(Self::inches(value)),
            other => Err(LengthParseError::UnknownUnit(other.to_string())),
        }
    }
}

impl TryFrom<String> for Length {
    type Error = LengthParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Length> for String {
    fn from(l: Length) -> Self {
        l.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parses_every_unit() {
        assert_abs_diff_eq!("3.5in".parse::<Length>().unwrap().as_mm(), 88.9, epsilon = 1e-9);
        assert_abs_diff_eq!("30cm".parse::<Length>().unwrap().as_mm(), 300.0);
        assert_abs_diff_eq!("0.1 m".parse::<Length>().unwrap().as_mm(), 100.0);
        assert_abs_diff_eq!("12mm".parse::<Length>().unwrap().as_mm(), 12.0);
        assert_abs_diff_eq!("2\"".parse::<Length>().unwrap().as_inches(), 2.0);
    }

    #[test]
    fn rejects_missing_or_unknown_units() {
        assert_eq!(
            "12".parse::<Length>(),
            Err(LengthParseError::MissingUnit("12".into()))
        );
        assert_eq!(
            "12ft".parse::<Length>(),
            Err(LengthParseError::UnknownUnit("ft".into()))
        );
        assert!(matches!(
            "abcm".parse::<Length>(),
            Err(LengthParseError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn display_round_trips() {
        let l = Length::cm(30.0);
        assert_eq!(l.to_string().parse::<Length>().unwrap(), l);
    }
}
