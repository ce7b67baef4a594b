use crate::header::DeviceVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Frequency,
    Magnitude,
    ZeroPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Time,
    LocalTime,
    BoxTemperature,
    SkyTemperature,
    /// `channel` is `None` on single channel devices, 1-based otherwise.
    Channel {
        quantity: Quantity,
        channel: Option<u8>,
    },
    SequenceNumber,
    SunAltitude,
    SunAzimuth,
    MoonAltitude,
    MoonAzimuth,
    MoonIllumination,
}

impl Column {
    pub fn label(self) -> String {
        match self {
            Column::Time => "time".to_string(),
            Column::LocalTime => "Local Date & Time".to_string(),
            Column::BoxTemperature => "Enclosure Temperature".to_string(),
            Column::SkyTemperature => "Sky Temperature".to_string(),
            Column::Channel { quantity, channel } => {
                let (single, prefix) = match quantity {
                    Quantity::Frequency => ("Frequency", "Freq"),
                    Quantity::Magnitude => ("MSAS", "MSAS"),
                    Quantity::ZeroPoint => ("ZP", "ZP"),
                };
                match channel {
                    Some(channel) => format!("{prefix}{channel}"),
                    None => single.to_string(),
                }
            }
            Column::SequenceNumber => "Sequence Number".to_string(),
            Column::SunAltitude => "Sun Alt".to_string(),
            Column::SunAzimuth => "Sun Az".to_string(),
            Column::MoonAltitude => "Moon Alt".to_string(),
            Column::MoonAzimuth => "Moon Az".to_string(),
            Column::MoonIllumination => "Moon Illumination".to_string(),
        }
    }
}

pub(crate) fn channel_index(channel: Option<u8>) -> usize {
    channel.map(|channel| usize::from(channel) - 1).unwrap_or(0)
}

fn channel_columns(variant: DeviceVariant) -> Vec<Column> {
    let channels: Vec<Option<u8>> = match variant {
        DeviceVariant::SingleChannel => vec![None],
        DeviceVariant::FourChannel => (1..=4).map(Some).collect(),
    };
    channels
        .into_iter()
        .flat_map(|channel| {
            [Quantity::Frequency, Quantity::Magnitude, Quantity::ZeroPoint]
                .map(|quantity| Column::Channel { quantity, channel })
        })
        .collect()
}

/// Field order of a raw IDA row.
pub fn raw_columns(variant: DeviceVariant) -> Vec<Column> {
    let mut columns = vec![
        Column::Time,
        Column::LocalTime,
        Column::BoxTemperature,
        Column::SkyTemperature,
    ];
    columns.extend(channel_columns(variant));
    columns.push(Column::SequenceNumber);
    columns
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub variant: DeviceVariant,
    /// Sun and moon azimuth columns are present.
    pub azimuth: bool,
}

impl ColumnLayout {
    pub fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column::Time,
            Column::BoxTemperature,
            Column::SkyTemperature,
        ];
        columns.extend(channel_columns(self.variant));
        columns.push(Column::SequenceNumber);
        columns.push(Column::SunAltitude);
        if self.azimuth {
            columns.push(Column::SunAzimuth);
        }
        columns.push(Column::MoonAltitude);
        if self.azimuth {
            columns.push(Column::MoonAzimuth);
        }
        columns.push(Column::MoonIllumination);
        columns
    }

    pub fn labels(&self) -> Vec<String> {
        self.columns().into_iter().map(Column::label).collect()
    }

    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Option<Self> {
        let candidates = [DeviceVariant::SingleChannel, DeviceVariant::FourChannel]
            .into_iter()
            .flat_map(|variant| [false, true].map(|azimuth| ColumnLayout { variant, azimuth }));
        candidates.into_iter().find(|layout| {
            let expected = layout.labels();
            expected.len() == labels.len()
                && expected
                    .iter()
                    .zip(labels)
                    .all(|(expected, label)| expected == label.as_ref())
        })
    }
}
