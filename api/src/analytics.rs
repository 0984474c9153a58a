//! Driving-behaviour summary computed from raw telemetry.
//!
//! Everything here is pure: the same records always produce the same
//! summary, and malformed numeric fields count as zero instead of failing.

use crate::model::{
    CurrentMetrics, DashboardSummary, DrivingStats, HourlyBucket, RecordView, ScoreRating,
    TelemetryRecord,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::debug;

const BASE_SCORE: i32 = 85;
const TOP_SPEED_LIMIT: f64 = 80.0;
const TOP_SPEED_PENALTY: i32 = 10;
const HARSH_ACCELERATION: f64 = 3.0;
const HARSH_ACCELERATION_PENALTY: i32 = 5;
const HARSH_BRAKING_PENALTY: i32 = 5;
const SPEEDING_THRESHOLD: f64 = 60.0;
const SPEEDING_RATE_LIMIT: f64 = 0.3;
const SPEEDING_PENALTY: i32 = 5;

pub const RECENT_RECORDS: usize = 10;
pub const HOURS_PER_DAY: u32 = 24;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%d.%m.%Y"];
const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Scalar magnitude of the acceleration vector. Missing axes are zero.
pub fn magnitude(record: &TelemetryRecord) -> f64 {
    let x = record.acc_x.unwrap_or(0.0);
    let y = record.acc_y.unwrap_or(0.0);
    let z = record.acc_z.unwrap_or(0.0);
    (x * x + y * y + z * z).sqrt()
}

/// Rounds to one decimal place, halves away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Heuristic 0-100 score. `speeds` holds only the positive speeds.
///
/// A vector magnitude is never negative, so the harsh-braking penalty cannot
/// fire for anything `summarize` passes in. It stays until product decides
/// whether braking should be measured from signed acceleration.
pub fn driving_score(max_speed: f64, avg_acceleration: f64, speeds: &[f64]) -> i32 {
    let mut score = BASE_SCORE;

    if max_speed > TOP_SPEED_LIMIT {
        score -= TOP_SPEED_PENALTY;
    }
    if avg_acceleration > HARSH_ACCELERATION {
        score -= HARSH_ACCELERATION_PENALTY;
    }
    if avg_acceleration < -HARSH_ACCELERATION {
        score -= HARSH_BRAKING_PENALTY;
    }

    if !speeds.is_empty() {
        let violations = speeds.iter().filter(|s| **s > SPEEDING_THRESHOLD).count();
        if violations as f64 / speeds.len() as f64 > SPEEDING_RATE_LIMIT {
            score -= SPEEDING_PENALTY;
        }
    }

    score.clamp(0, 100)
}

pub fn to_view(record: &TelemetryRecord) -> RecordView {
    RecordView {
        id: record.id,
        date: record.date.clone().unwrap_or_default(),
        time: record.time.clone().unwrap_or_default(),
        speed: record.speed.unwrap_or(0.0),
        acceleration: magnitude(record),
    }
}

/// Parses a full date-time string. Offsets are normalised to UTC; naive
/// strings are taken as written.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Instant a record describes, from its `date` and `time` fields.
///
/// A `time` that is itself a full date-time wins over `date`.
pub fn record_instant(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let time = time?.trim();
    if let Some(full) = parse_datetime(time) {
        return Some(full);
    }

    let date = date?.trim();
    let day = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date, fmt).ok())
        .or_else(|| parse_datetime(date).map(|dt| dt.date()))?;
    let clock = TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(time, fmt).ok())?;

    Some(day.and_time(clock))
}

/// Hour of day a `time` field refers to.
///
/// "HH:MM[:SS]" yields its leading number. Anything else is tried as a full
/// date-time. The result is not range-checked: an hour of 25 simply lands in
/// no bucket.
pub fn hour_of(time: &str) -> Option<u32> {
    let time = time.trim();
    if time.is_empty() {
        return None;
    }
    if let Some((head, _)) = time.split_once(':') {
        if let Ok(hour) = head.trim().parse::<u32>() {
            return Some(hour);
        }
    }
    parse_datetime(time).map(|dt| dt.hour())
}

#[derive(Debug, Clone, Copy)]
struct HourAccumulator {
    count: usize,
    speed_sum: f64,
    speed_max: f64,
    acceleration_sum: f64,
}

impl Default for HourAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            speed_sum: 0.0,
            speed_max: f64::NEG_INFINITY,
            acceleration_sum: 0.0,
        }
    }
}

impl HourAccumulator {
    fn into_bucket(self, hour: u32) -> HourlyBucket {
        let (avg_speed, max_speed, avg_acceleration) = if self.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = self.count as f64;
            (self.speed_sum / n, self.speed_max, self.acceleration_sum / n)
        };

        HourlyBucket {
            hour: format!("{:02}:00", hour),
            avg_speed: round1(avg_speed),
            max_speed: round1(max_speed),
            avg_acceleration: round1(avg_acceleration),
        }
    }
}

/// One bucket per hour of the day, in order, empty hours included.
pub fn hourly_buckets(records: &[TelemetryRecord]) -> Vec<HourlyBucket> {
    let mut hours = [HourAccumulator::default(); HOURS_PER_DAY as usize];

    for record in records {
        let Some(hour) = record.time.as_deref().and_then(hour_of) else {
            continue;
        };
        let Some(acc) = hours.get_mut(hour as usize) else {
            continue;
        };
        let speed = record.speed.unwrap_or(0.0);
        acc.count += 1;
        acc.speed_sum += speed;
        acc.speed_max = acc.speed_max.max(speed);
        acc.acceleration_sum += magnitude(record);
    }

    hours
        .into_iter()
        .zip(0..HOURS_PER_DAY)
        .map(|(acc, hour)| acc.into_bucket(hour))
        .collect()
}

/// The newest records by `date` + `time`. Records whose instant cannot be
/// read go last, in input order.
pub fn recent_records(records: &[TelemetryRecord], count: usize) -> Vec<RecordView> {
    let mut ordered: Vec<(Option<NaiveDateTime>, &TelemetryRecord)> = records
        .iter()
        .map(|r| (record_instant(r.date.as_deref(), r.time.as_deref()), r))
        .collect();
    ordered.sort_by(|a, b| b.0.cmp(&a.0));

    ordered
        .into_iter()
        .take(count)
        .map(|(_, record)| to_view(record))
        .collect()
}

/// Builds the dashboard summary for one device.
///
/// `records` should be newest-first: the current metrics take their date
/// and time from the first element.
pub fn summarize(records: &[TelemetryRecord]) -> DashboardSummary {
    let speeds: Vec<f64> = records
        .iter()
        .map(|r| r.speed.unwrap_or(0.0))
        .filter(|s| *s > 0.0)
        .collect();
    let magnitudes: Vec<f64> = records.iter().map(magnitude).collect();

    let avg_speed = mean(&speeds);
    let max_speed = speeds.iter().copied().fold(0.0, f64::max);
    let avg_acceleration = mean(&magnitudes);

    debug!(
        "Summarizing {} records: avg_speed={:.2}, max_speed={:.2}, avg_acceleration={:.2}",
        records.len(),
        avg_speed,
        max_speed,
        avg_acceleration
    );

    let overall_score = driving_score(max_speed, avg_acceleration, &speeds);
    let latest = records.first();

    DashboardSummary {
        overall_score,
        rating: ScoreRating::from_score(overall_score),
        current_metrics: CurrentMetrics {
            speed: round1(avg_speed),
            acceleration: round1(avg_acceleration),
            date: latest.and_then(|r| r.date.clone()),
            time: latest.and_then(|r| r.time.clone()),
        },
        recent_records: recent_records(records, RECENT_RECORDS),
        hourly_data: hourly_buckets(records),
        stats: DrivingStats {
            total_records: records.len(),
            avg_speed: round1(avg_speed),
            max_speed: round1(max_speed),
            avg_acceleration: round1(avg_acceleration),
        },
    }
}
