//! Country identifiers.
//!
//! Every source speaks a slightly different dialect: Eurostat uses alpha-2
//! with `EL` for Greece, OWID and OxCGRT use alpha-3. A `Region` is always the
//! upper-cased ISO-3166 alpha-2 code.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DomainError;

/// EU-27 member states as (alpha-2, alpha-3).
pub const EU_MEMBERS: [(&str, &str); 27] = [
    ("AT", "AUT"),
    ("BE", "BEL"),
    ("BG", "BGR"),
    ("CY", "CYP"),
    ("CZ", "CZE"),
    ("DE", "DEU"),
    ("DK", "DNK"),
    ("EE", "EST"),
    ("ES", "ESP"),
    ("FI", "FIN"),
    ("FR", "FRA"),
    ("GR", "GRC"),
    ("HR", "HRV"),
    ("HU", "HUN"),
    ("IE", "IRL"),
    ("IT", "ITA"),
    ("LT", "LTU"),
    ("LU", "LUX"),
    ("LV", "LVA"),
    ("MT", "MLT"),
    ("NL", "NLD"),
    ("PL", "POL"),
    ("PT", "PRT"),
    ("RO", "ROU"),
    ("SE", "SWE"),
    ("SI", "SVN"),
    ("SK", "SVK"),
];

/// ISO-3166 alpha-2 country code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Parse an alpha-2 or EU alpha-3 code. Input is trimmed and upper-cased.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim().to_ascii_uppercase();
        if !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidRegion(raw.to_string()));
        }
        match code.len() {
            2 => {
                // Eurostat writes Greece as EL.
                let code = if code == "EL" { "GR".to_string() } else { code };
                Ok(Self(code))
            }
            3 => iso3_to_iso2(&code)
                .map(|a2| Self(a2.to_string()))
                .ok_or(DomainError::UnknownIso3(code)),
            _ => Err(DomainError::InvalidRegion(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the region is an EU-27 member state.
    pub fn is_eu(&self) -> bool {
        EU_MEMBERS.iter().any(|(a2, _)| *a2 == self.0)
    }

    /// Alpha-3 code, for EU members only.
    pub fn iso3(&self) -> Option<&'static str> {
        EU_MEMBERS
            .iter()
            .find(|(a2, _)| *a2 == self.0)
            .map(|(_, a3)| *a3)
    }
}

/// Map an EU alpha-3 code to alpha-2.
pub fn iso3_to_iso2(code: &str) -> Option<&'static str> {
    let code = code.trim();
    EU_MEMBERS
        .iter()
        .find(|(_, a3)| a3.eq_ignore_ascii_case(code))
        .map(|(a2, _)| *a2)
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Region {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Region::parse(&value)
    }
}

impl From<Region> for String {
    fn from(region: Region) -> Self {
        region.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_case_and_whitespace() {
        assert_eq!(Region::parse(" de ").unwrap().as_str(), "DE");
    }

    #[test]
    fn greece_alias_maps_to_gr() {
        assert_eq!(Region::parse("EL").unwrap().as_str(), "GR");
        assert_eq!(Region::parse("GRC").unwrap().as_str(), "GR");
    }

    #[test]
    fn alpha3_maps_to_alpha2() {
        assert_eq!(Region::parse("deu").unwrap().as_str(), "DE");
        assert_eq!(Region::parse("SVK").unwrap().as_str(), "SK");
    }

    #[test]
    fn unknown_alpha3_is_rejected() {
        assert!(matches!(
            Region::parse("USA"),
            Err(DomainError::UnknownIso3(_))
        ));
    }

    #[test]
    fn aggregates_and_garbage_are_rejected() {
        assert!(Region::parse("OWID_WRL").is_err());
        assert!(Region::parse("EU27_2020").is_err());
        assert!(Region::parse("").is_err());
    }

    #[test]
    fn eu_membership() {
        assert!(Region::parse("FR").unwrap().is_eu());
        assert!(!Region::parse("NO").unwrap().is_eu());
        assert_eq!(Region::parse("MT").unwrap().iso3(), Some("MLT"));
    }
}
