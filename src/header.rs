use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Position;
use crate::error::IdaError;

pub const HEADER_LINES: usize = 35;
pub const END_OF_HEADER: &str = "END OF HEADER";

const LICENSE_PREFIX: &str = "This data is released under";

const KEY_HEADER_LINES: &str = "Number of header lines";
const KEY_CHANNELS: &str = "Number of channels";
const KEY_DEVICE_TYPE: &str = "Device type";
const KEY_INSTRUMENT_ID: &str = "Instrument ID";
const KEY_SUPPLIER: &str = "Data supplier";
const KEY_LOCATION: &str = "Location name";
const KEY_TIMEZONE: &str = "Local timezone";
const KEY_POSITION: &str = "Position";
const KEY_FOV: &str = "Field of view";
const KEY_FIELDS: &str = "Number of fields per line";
const KEY_FILTERS: &str = "Filters per channel";
const KEY_AIM: &str = "Measurement direction per channel";
const KEY_COVER_OFFSET: &str = "TESS cover offset value";
const KEY_ZERO_POINT: &str = "TESS zero point";
const KEY_COMMENT: &str = "Comment";

/// Photometer model, fixed by the channel count and the number of fields per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceVariant {
    #[serde(rename = "TESS-W")]
    SingleChannel,
    #[serde(rename = "TESS4C")]
    FourChannel,
}

impl DeviceVariant {
    pub fn channels(self) -> usize {
        match self {
            DeviceVariant::SingleChannel => 1,
            DeviceVariant::FourChannel => 4,
        }
    }

    pub fn fields_per_line(self) -> usize {
        match self {
            DeviceVariant::SingleChannel => 8,
            DeviceVariant::FourChannel => 17,
        }
    }

    fn from_counts(channels: usize, fields: usize) -> Option<Self> {
        [DeviceVariant::SingleChannel, DeviceVariant::FourChannel]
            .into_iter()
            .find(|variant| variant.channels() == channels && variant.fields_per_line() == fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub observer: Option<String>,
    pub affiliation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationName {
    pub place: Option<String>,
    pub town: Option<String>,
    pub sub_region: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aim {
    pub azimuth: f64,
    pub zenith: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderMetadata {
    #[serde(rename = "License")]
    pub license: String,
    #[serde(rename = "Number of header lines")]
    pub header_lines: usize,
    #[serde(rename = "Device type")]
    pub device_type: String,
    #[serde(rename = "Instrument ID")]
    pub instrument_id: String,
    #[serde(rename = "Data supplier")]
    pub supplier: Supplier,
    #[serde(rename = "Location name")]
    pub location: LocationName,
    #[serde(rename = "Local timezone")]
    pub timezone: String,
    #[serde(rename = "Position")]
    pub position: Option<Position>,
    #[serde(rename = "Field of view")]
    pub field_of_view: f64,
    #[serde(rename = "Number of channels")]
    pub channels: usize,
    #[serde(rename = "Number of fields per line")]
    pub fields_per_line: usize,
    #[serde(rename = "Filters per channel")]
    pub filters: Vec<String>,
    #[serde(rename = "Measurement direction per channel")]
    pub aim: Vec<Aim>,
    #[serde(rename = "TESS cover offset value")]
    pub cover_offset: f64,
    #[serde(rename = "TESS zero point")]
    pub zero_points: Vec<f64>,
    #[serde(rename = "Comments", default)]
    pub comments: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl HeaderMetadata {
    pub fn variant(&self) -> Result<DeviceVariant, IdaError> {
        DeviceVariant::from_counts(self.channels, self.fields_per_line).ok_or_else(|| {
            IdaError::parse(
                &self.instrument_id,
                format!(
                    "unsupported device: {} channels with {} fields per line",
                    self.channels, self.fields_per_line
                ),
            )
        })
    }

    /// True when any channel is tilted away from the zenith.
    pub fn points_off_zenith(&self) -> bool {
        self.aim.iter().any(|aim| aim.zenith != 0.0)
    }
}

pub fn split_ida<'a>(file: &str, content: &'a str) -> Result<(HeaderMetadata, &'a str), IdaError> {
    let mut lines = Vec::with_capacity(HEADER_LINES);
    let mut offset = 0;
    for line in content.split_inclusive('\n').take(HEADER_LINES) {
        offset += line.len();
        lines.push(line.trim_end_matches(['\r', '\n']));
    }
    if lines.len() < HEADER_LINES {
        return Err(IdaError::parse(
            file,
            format!("header has {} lines, expected {HEADER_LINES}", lines.len()),
        ));
    }
    let header = parse_header(file, &lines)?;
    Ok((header, &content[offset..]))
}

pub fn parse_header(file: &str, lines: &[&str]) -> Result<HeaderMetadata, IdaError> {
    if lines.len() != HEADER_LINES {
        return Err(IdaError::parse(
            file,
            format!("header has {} lines, expected {HEADER_LINES}", lines.len()),
        ));
    }
    let mut texts = Vec::with_capacity(HEADER_LINES);
    for (number, line) in lines.iter().enumerate() {
        let text = line
            .strip_prefix('#')
            .ok_or_else(|| IdaError::parse(file, format!("header line {} is not a comment", number + 1)))?;
        texts.push(text.trim());
    }
    if texts[HEADER_LINES - 1] != END_OF_HEADER {
        return Err(IdaError::parse(file, "missing END OF HEADER sentinel"));
    }

    let mut pairs: BTreeMap<String, String> = BTreeMap::new();
    let mut license = None;
    let mut comments = Vec::new();
    for text in &texts[..HEADER_LINES - 1] {
        let Some((key, value)) = split_pair(text) else {
            continue;
        };
        if key == KEY_COMMENT {
            if !value.is_empty() {
                comments.push(value.to_string());
            }
        } else if key.starts_with(LICENSE_PREFIX) {
            license = Some(value.to_string());
        } else {
            pairs.insert(key.to_string(), value.to_string());
        }
    }

    let mut fields = Fields { file, pairs };
    let header_lines: usize = fields.number(KEY_HEADER_LINES)?;
    if header_lines != HEADER_LINES {
        return Err(IdaError::parse(
            file,
            format!("declares {header_lines} header lines, expected {HEADER_LINES}"),
        ));
    }
    let channels: usize = fields.number(KEY_CHANNELS)?;
    let fields_per_line: usize = fields.number(KEY_FIELDS)?;
    if DeviceVariant::from_counts(channels, fields_per_line).is_none() {
        return Err(IdaError::parse(
            file,
            format!("unsupported device: {channels} channels with {fields_per_line} fields per line"),
        ));
    }

    let supplier = {
        let raw = fields.required(KEY_SUPPLIER)?;
        let (observer, affiliation) = raw
            .split_once('/')
            .ok_or_else(|| IdaError::parse(file, format!("{KEY_SUPPLIER}: expected observer/affiliation")))?;
        Supplier {
            observer: value_or_none(observer),
            affiliation: value_or_none(affiliation),
        }
    };
    let location = parse_location(file, &fields.required(KEY_LOCATION)?)?;
    let position = match fields.optional(KEY_POSITION) {
        Some(raw) => parse_position(file, &raw)?,
        None => None,
    };
    let filters = parse_list(&fields.required(KEY_FILTERS)?, channels)
        .ok_or_else(|| IdaError::parse(file, format!("{KEY_FILTERS}: expected {channels} values")))?;
    let zero_points: Vec<f64> = parse_list(&fields.required(KEY_ZERO_POINT)?, channels)
        .and_then(|values| values.iter().map(|value| value.parse::<f64>().ok()).collect())
        .ok_or_else(|| {
            IdaError::parse(file, format!("{KEY_ZERO_POINT}: expected {channels} numbers"))
        })?;
    let aim = parse_aim(&fields.required(KEY_AIM)?, channels)
        .ok_or_else(|| IdaError::parse(file, format!("{KEY_AIM}: expected {channels} (azimuth, zenith) pairs")))?;

    Ok(HeaderMetadata {
        license: license.ok_or_else(|| IdaError::parse(file, "missing license line"))?,
        header_lines,
        device_type: fields.required(KEY_DEVICE_TYPE)?,
        instrument_id: fields.required(KEY_INSTRUMENT_ID)?,
        supplier,
        location,
        timezone: fields.required(KEY_TIMEZONE)?,
        position,
        field_of_view: fields.number(KEY_FOV)?,
        channels,
        fields_per_line,
        filters,
        aim,
        cover_offset: fields.number(KEY_COVER_OFFSET)?,
        zero_points,
        comments,
        extra: fields.pairs,
    })
}

/// Consumes known keys out of the raw pairs; whatever remains is `extra`.
struct Fields<'f> {
    file: &'f str,
    pairs: BTreeMap<String, String>,
}

impl Fields<'_> {
    fn optional(&mut self, key: &str) -> Option<String> {
        self.pairs.remove(key)
    }

    fn required(&mut self, key: &str) -> Result<String, IdaError> {
        self.pairs
            .remove(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| IdaError::parse(self.file, format!("missing header field '{key}'")))
    }

    fn number<T: std::str::FromStr>(&mut self, key: &str) -> Result<T, IdaError> {
        let raw = self.required(key)?;
        raw.parse()
            .map_err(|_| IdaError::parse(self.file, format!("{key}: not a number: {raw}")))
    }
}

fn split_pair(text: &str) -> Option<(&str, &str)> {
    if let Some((key, value)) = text.split_once(": ") {
        return Some((key.trim(), value.trim()));
    }
    text.strip_suffix(':').map(|key| (key.trim(), ""))
}

fn value_or_none(value: &str) -> Option<String> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "none" | "unknown" => None,
        _ => Some(value.to_string()),
    }
}

fn parse_location(file: &str, raw: &str) -> Result<LocationName, IdaError> {
    let parts: Vec<Option<String>> = raw.split('/').map(value_or_none).collect();
    match parts.as_slice() {
        [place, town, sub_region, region, country] => Ok(LocationName {
            place: place.clone(),
            town: town.clone(),
            sub_region: sub_region.clone(),
            region: region.clone(),
            country: country.clone(),
        }),
        [place, sub_region, region, country] => Ok(LocationName {
            place: place.clone(),
            town: None,
            sub_region: sub_region.clone(),
            region: region.clone(),
            country: country.clone(),
        }),
        _ => Err(IdaError::parse(
            file,
            format!("{KEY_LOCATION}: expected place/town/sub_region/region/country, got {raw}"),
        )),
    }
}

/// `latitude, longitude, height`; any unknown component means no position.
fn parse_position(file: &str, raw: &str) -> Result<Option<Position>, IdaError> {
    let parts: Vec<Option<String>> = raw.split(',').map(value_or_none).collect();
    let [latitude, longitude, height] = parts.as_slice() else {
        return Err(IdaError::parse(file, format!("{KEY_POSITION}: expected latitude, longitude, height")));
    };
    let (Some(latitude), Some(longitude), Some(height)) = (latitude, longitude, height) else {
        return Ok(None);
    };
    let number = |value: &str| {
        value
            .parse::<f64>()
            .map_err(|_| IdaError::parse(file, format!("{KEY_POSITION}: not a number: {value}")))
    };
    Ok(Some(Position {
        latitude: number(latitude)?,
        longitude: number(longitude)?,
        height: number(height)?,
    }))
}

/// A scalar for one channel, `[a, b, c, d]` (optionally quoted) for several.
fn parse_list(raw: &str, channels: usize) -> Option<Vec<String>> {
    let raw = raw.trim();
    if channels == 1 && !raw.starts_with('[') {
        return Some(vec![raw.to_string()]);
    }
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
    let values: Vec<String> = inner
        .split(',')
        .map(|value| value.trim().trim_matches(['\'', '"']).to_string())
        .collect();
    (values.len() == channels).then_some(values)
}

fn parse_aim(raw: &str, channels: usize) -> Option<Vec<Aim>> {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !matches!(ch, '(' | ')' | '[' | ']'))
        .collect();
    let numbers: Vec<f64> = cleaned
        .split(',')
        .map(|value| value.trim().parse::<f64>().ok())
        .collect::<Option<_>>()?;
    if numbers.len() != channels * 2 {
        return None;
    }
    Some(
        numbers
            .chunks(2)
            .map(|pair| Aim {
                azimuth: pair[0],
                zenith: pair[1],
            })
            .collect(),
    )
}
