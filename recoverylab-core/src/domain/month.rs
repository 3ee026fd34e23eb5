//! Calendar month, the time axis of the panel.
//!
//! Sources report dates as days, months, quarters or years. All of them are
//! floored to the first day of a month; quarters land on the quarter's first
//! month and years on January.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DomainError;

/// First day of a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month {
    year: i32,
    /// 1..=12
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&month) {
            return Err(DomainError::InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse any of the date spellings found in the raw sources.
    ///
    /// Accepted: `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
    /// `YYYY-MM`, `YYYYMMDD`, `YYYYMmm`, `YYYY-Qn`, `YYYYQn` and `YYYY`.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidMonth(raw.to_string());
        let s = raw.trim();
        let s = s.split(['T', ' ']).next().unwrap_or(s);
        if s.len() < 4 || !s.is_char_boundary(4) {
            return Err(invalid());
        }
        let (year_part, rest) = s.split_at(4);
        let year: i32 = year_part.parse().map_err(|_| invalid())?;
        if !year_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        if rest.is_empty() {
            return Self::new(year, 1);
        }

        if let Some(m) = rest.strip_prefix('M') {
            let month: u32 = parse_digits(m).ok_or_else(invalid)?;
            return Self::new(year, month).map_err(|_| invalid());
        }

        let quarter = rest
            .strip_prefix("-Q")
            .or_else(|| rest.strip_prefix('Q'));
        if let Some(q) = quarter {
            let q: u32 = parse_digits(q).ok_or_else(invalid)?;
            if !(1..=4).contains(&q) {
                return Err(invalid());
            }
            return Self::new(year, (q - 1) * 3 + 1);
        }

        if rest.len() == 4 && rest.chars().all(|c| c.is_ascii_digit()) {
            let date = NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| invalid())?;
            return Ok(Self::from_date(date));
        }

        if let Some(tail) = rest.strip_prefix('-') {
            let mut parts = tail.split('-');
            let month: u32 = parts.next().and_then(parse_digits).ok_or_else(invalid)?;
            match parts.next() {
                None => return Self::new(year, month).map_err(|_| invalid()),
                Some(_) => {
                    let date =
                        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
                    return Ok(Self::from_date(date));
                }
            }
        }

        Err(invalid())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Month of year, 1..=12.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// Month of year, 0..=11.
    pub fn month0(&self) -> u32 {
        self.month - 1
    }

    /// Months since year 0, used for arithmetic.
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + self.month0() as i64
    }

    pub fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn add_months(&self, n: i64) -> Self {
        Self::from_index(self.index() + n)
    }

    pub fn succ(&self) -> Self {
        self.add_months(1)
    }

    pub fn pred(&self) -> Self {
        self.add_months(-1)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_between(&self, other: Month) -> i64 {
        other.index() - self.index()
    }

    /// Iterate months from `self` to `end`, inclusive.
    pub fn range_inclusive(self, end: Month) -> impl Iterator<Item = Month> {
        (self.index()..=end.index()).map(Month::from_index)
    }

    pub fn to_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-01", self.year, self.month)
    }
}

impl TryFrom<String> for Month {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Month::parse(&value)
    }
}

impl From<Month> for String {
    fn from(month: Month) -> Self {
        month.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(y: i32, mo: u32) -> Month {
        Month::new(y, mo).unwrap()
    }

    #[test]
    fn parses_all_source_spellings() {
        assert_eq!(Month::parse("2020-03-17").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("2020-03-17T00:00:00").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("2020-03-17 00:00:00").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("2020-03").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("20200317").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("2020M03").unwrap(), m(2020, 3));
        assert_eq!(Month::parse("2020-Q2").unwrap(), m(2020, 4));
        assert_eq!(Month::parse("2020Q4").unwrap(), m(2020, 10));
        assert_eq!(Month::parse("2020").unwrap(), m(2020, 1));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "20", "abcd", "2020-13", "2020M13", "2020-Q5", "2020-02-30", "x2020"] {
            assert!(Month::parse(bad).is_err(), "should reject {bad:?}");
        }
    }

    #[test]
    fn arithmetic_crosses_year_boundaries() {
        assert_eq!(m(2020, 1).pred(), m(2019, 12));
        assert_eq!(m(2020, 12).succ(), m(2021, 1));
        assert_eq!(m(2020, 3).add_months(-15), m(2018, 12));
        assert_eq!(m(2019, 11).months_between(m(2020, 2)), 3);
    }

    #[test]
    fn ordering_is_chronological() {
        assert!(m(2019, 12) < m(2020, 1));
        assert!(m(2020, 2) < m(2020, 10));
    }

    #[test]
    fn display_is_first_of_month() {
        assert_eq!(m(2021, 7).to_string(), "2021-07-01");
        assert_eq!(Month::parse(&m(2021, 7).to_string()).unwrap(), m(2021, 7));
    }

    #[test]
    fn range_is_inclusive() {
        let months: Vec<_> = m(2020, 11).range_inclusive(m(2021, 2)).collect();
        assert_eq!(months.len(), 4);
        assert_eq!(months[3], m(2021, 2));
    }
}
