use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Local};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IdaError;

/// `<instrument>_<YYYY>-<MM>[_<n>].<ext>`, `<n>` disambiguating relocations within a month.
static UNIT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9-]+)_(?P<year>\d{4})-(?P<month>\d{2})(?:_(?P<index>-?\d+))?\.(?P<ext>[a-z]+)$")
        .expect("unit filename pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentName(String);

impl InstrumentName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Network photometers are published as `stars<N>`.
    pub fn from_number(number: u32) -> Self {
        Self(format!("stars{number}"))
    }
}

impl fmt::Display for InstrumentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstrumentName {
    type Err = IdaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
        if !is_valid {
            return Err(IdaError::InvalidInstrument(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, IdaError> {
        if !(1..=12).contains(&month) || !(1000..=9999).contains(&year) {
            return Err(IdaError::InvalidPeriod(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self {
            year: today.year(),
            month: today.month(),
        }
    }

    pub fn previous() -> Self {
        Self::current().prev()
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// `YYYYMM`, used in combined file names.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    /// Inclusive month range; empty when `since` is after `until`.
    pub fn range(since: Period, until: Period) -> Vec<Period> {
        let mut months = Vec::new();
        let mut month = since;
        while month <= until {
            months.push(month);
            month = month.next();
        }
        months
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = IdaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| IdaError::InvalidPeriod(value.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(IdaError::InvalidPeriod(value.to_string()));
        }
        let year = year
            .parse::<i32>()
            .map_err(|_| IdaError::InvalidPeriod(value.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| IdaError::InvalidPeriod(value.to_string()))?;
        Self::new(year, month).map_err(|_| IdaError::InvalidPeriod(value.to_string()))
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Geographic position in decimal degrees and metres above sea level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

/// The (instrument, period, relocation index) triple encoded in IDA and artifact file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitName {
    pub instrument: InstrumentName,
    pub period: Period,
    pub relocation: Option<i32>,
}

impl UnitName {
    pub fn stem(&self) -> String {
        match self.relocation {
            Some(index) => format!("{}_{}_{}", self.instrument, self.period, index),
            None => format!("{}_{}", self.instrument, self.period),
        }
    }

    pub fn parse(filename: &str, extension: &str) -> Result<Self, IdaError> {
        let caps = UNIT_FILENAME
            .captures(filename)
            .ok_or_else(|| IdaError::InvalidFilename(filename.to_string()))?;
        if &caps["ext"] != extension {
            return Err(IdaError::InvalidFilename(filename.to_string()));
        }
        let instrument = caps["name"].parse()?;
        let year = caps["year"]
            .parse::<i32>()
            .map_err(|_| IdaError::InvalidFilename(filename.to_string()))?;
        let month = caps["month"]
            .parse::<u32>()
            .map_err(|_| IdaError::InvalidFilename(filename.to_string()))?;
        let period =
            Period::new(year, month).map_err(|_| IdaError::InvalidFilename(filename.to_string()))?;
        let relocation = caps
            .name("index")
            .map(|index| index.as_str().parse::<i32>())
            .transpose()
            .map_err(|_| IdaError::InvalidFilename(filename.to_string()))?;
        Ok(Self {
            instrument,
            period,
            relocation,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceDescriptor {
    unit: UnitName,
    url: Option<String>,
}

impl SourceDescriptor {
    pub fn canonical(instrument: InstrumentName, period: Period) -> Self {
        Self {
            unit: UnitName {
                instrument,
                period,
                relocation: None,
            },
            url: None,
        }
    }

    /// Builds a descriptor from an exact (possibly relocation-disambiguated) file name.
    pub fn from_filename(filename: &str) -> Result<Self, IdaError> {
        Ok(Self {
            unit: UnitName::parse(filename, "dat")?,
            url: None,
        })
    }

    /// Resolves the NextCloud download URL against `base_url`.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, IdaError> {
        let endpoint = format!("{}/download", base_url.trim_end_matches('/'));
        let url = reqwest::Url::parse_with_params(
            &endpoint,
            &[
                ("path", format!("/{}", self.unit.instrument)),
                ("files", self.filename()),
            ],
        )
        .map_err(|err| IdaError::InvalidConfig(format!("base_url {base_url}: {err}")))?;
        self.url = Some(url.to_string());
        Ok(self)
    }

    pub fn instrument(&self) -> &InstrumentName {
        &self.unit.instrument
    }

    pub fn period(&self) -> Period {
        self.unit.period
    }

    pub fn relocation(&self) -> Option<i32> {
        self.unit.relocation
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn filename(&self) -> String {
        format!("{}.dat", self.unit.stem())
    }

    pub fn artifact_filename(&self) -> String {
        format!("{}.ecsv", self.unit.stem())
    }
}
