use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::Position;

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

/// Horizontal coordinates in degrees; azimuth from north through east.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HorizontalPosition {
    pub altitude: f64,
    pub azimuth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EphemerisSample {
    pub sun: HorizontalPosition,
    pub moon: HorizontalPosition,
    /// Illuminated fraction of the lunar disk, 0 to 1.
    pub moon_illumination: f64,
}

pub trait EphemerisProvider: Send + Sync {
    /// `time` is UTC.
    fn sample(&self, position: &Position, time: NaiveDateTime) -> EphemerisSample;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionEphemeris;

impl EphemerisProvider for LowPrecisionEphemeris {
    fn sample(&self, position: &Position, time: NaiveDateTime) -> EphemerisSample {
        let days = days_since_j2000(time);
        let sun = sun_equatorial(days);
        let moon = moon_equatorial(days);
        let lst = local_sidereal_degrees(days, position.longitude);

        let sun_horizontal = to_horizontal(sun, lst, position.latitude);
        let mut moon_horizontal = to_horizontal(moon, lst, position.latitude);
        // Topocentric correction; the moon's parallax reaches a full degree.
        moon_horizontal.altitude -= moon.parallax * moon_horizontal.altitude.to_radians().cos();

        EphemerisSample {
            sun: sun_horizontal,
            moon: moon_horizontal,
            moon_illumination: illuminated_fraction(sun, moon),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Equatorial {
    right_ascension: f64,
    declination: f64,
    parallax: f64,
}

fn days_since_j2000(time: NaiveDateTime) -> f64 {
    let seconds = time.and_utc().timestamp_millis() as f64 / 1000.0;
    seconds / 86_400.0 + UNIX_EPOCH_JD - J2000_JD
}

fn sin_deg(value: f64) -> f64 {
    value.to_radians().sin()
}

fn cos_deg(value: f64) -> f64 {
    value.to_radians().cos()
}

fn obliquity(days: f64) -> f64 {
    23.439 - 0.000_000_4 * days
}

fn ecliptic_to_equatorial(longitude: f64, latitude: f64, days: f64, parallax: f64) -> Equatorial {
    let epsilon = obliquity(days);
    let l = cos_deg(latitude) * cos_deg(longitude);
    let m = cos_deg(epsilon) * cos_deg(latitude) * sin_deg(longitude)
        - sin_deg(epsilon) * sin_deg(latitude);
    let n = sin_deg(epsilon) * cos_deg(latitude) * sin_deg(longitude)
        + cos_deg(epsilon) * sin_deg(latitude);
    Equatorial {
        right_ascension: m.atan2(l).to_degrees().rem_euclid(360.0),
        declination: n.clamp(-1.0, 1.0).asin().to_degrees(),
        parallax,
    }
}

fn sun_equatorial(days: f64) -> Equatorial {
    let mean_longitude = 280.460 + 0.985_647_4 * days;
    let mean_anomaly = 357.528 + 0.985_600_3 * days;
    let longitude =
        mean_longitude + 1.915 * sin_deg(mean_anomaly) + 0.020 * sin_deg(2.0 * mean_anomaly);
    ecliptic_to_equatorial(longitude.rem_euclid(360.0), 0.0, days, 0.0)
}

fn moon_equatorial(days: f64) -> Equatorial {
    let t = days / 36_525.0;
    let longitude = 218.32 + 481_267.881 * t + 6.29 * sin_deg(135.0 + 477_198.87 * t)
        - 1.27 * sin_deg(259.3 - 413_335.36 * t)
        + 0.66 * sin_deg(235.7 + 890_534.22 * t)
        + 0.21 * sin_deg(269.9 + 954_397.74 * t)
        - 0.19 * sin_deg(357.5 + 35_999.05 * t)
        - 0.11 * sin_deg(186.5 + 966_404.03 * t);
    let latitude = 5.13 * sin_deg(93.3 + 483_202.02 * t)
        + 0.28 * sin_deg(228.2 + 960_400.89 * t)
        - 0.28 * sin_deg(318.3 + 6_003.15 * t)
        - 0.17 * sin_deg(217.6 - 407_332.21 * t);
    let parallax = 0.9508
        + 0.0518 * cos_deg(135.0 + 477_198.87 * t)
        + 0.0095 * cos_deg(259.3 - 413_335.36 * t)
        + 0.0078 * cos_deg(235.7 + 890_534.22 * t)
        + 0.0028 * cos_deg(269.9 + 954_397.74 * t);
    ecliptic_to_equatorial(longitude.rem_euclid(360.0), latitude, days, parallax)
}

fn local_sidereal_degrees(days: f64, longitude: f64) -> f64 {
    (280.460_618_37 + 360.985_647_366_29 * days + longitude).rem_euclid(360.0)
}

fn to_horizontal(body: Equatorial, lst: f64, latitude: f64) -> HorizontalPosition {
    let hour_angle = lst - body.right_ascension;
    let sin_altitude = sin_deg(latitude) * sin_deg(body.declination)
        + cos_deg(latitude) * cos_deg(body.declination) * cos_deg(hour_angle);
    let altitude = sin_altitude.clamp(-1.0, 1.0).asin().to_degrees();
    let y = -cos_deg(body.declination) * sin_deg(hour_angle);
    let x = sin_deg(body.declination) * cos_deg(latitude)
        - cos_deg(body.declination) * cos_deg(hour_angle) * sin_deg(latitude);
    HorizontalPosition {
        altitude,
        azimuth: y.atan2(x).to_degrees().rem_euclid(360.0),
    }
}

/// From the sun-moon elongation, neglecting the ratio of their distances.
fn illuminated_fraction(sun: Equatorial, moon: Equatorial) -> f64 {
    let cos_elongation = sin_deg(sun.declination) * sin_deg(moon.declination)
        + cos_deg(sun.declination)
            * cos_deg(moon.declination)
            * cos_deg(sun.right_ascension - moon.right_ascension);
    ((1.0 - cos_elongation.clamp(-1.0, 1.0)) / 2.0).clamp(0.0, 1.0)
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
