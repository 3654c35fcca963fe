// src/profile.rs
//! Setpoint profile.
//!
//! The operator uploads a CSV of `YYYYmmddHHMM,<celsius>` rows in the site's
//! local time; `NA` marks a stretch with no setpoint. A lookup returns the
//! value of the row closest to the requested instant, or NaN when the
//! instant falls outside the profile.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;

const TIME_FORMAT: &str = "%Y%m%d%H%M";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid UTC offset {0}h")]
    Offset(i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePoint {
    pub at: DateTime<Utc>,
    /// `None` for an `NA` row.
    pub celsius: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetpointProfile {
    points: Vec<ProfilePoint>,
}

pub fn utc_offset(hours: i32) -> Result<FixedOffset, ProfileError> {
    FixedOffset::east_opt(hours * 3600).ok_or(ProfileError::Offset(hours))
}

impl SetpointProfile {
    pub fn new(mut points: Vec<ProfilePoint>) -> Self {
        points.sort_by_key(|p| p.at);
        // a later row for the same minute replaces the earlier one
        points.reverse();
        points.dedup_by_key(|p| p.at);
        points.reverse();
        Self { points }
    }

    /// Parse CSV rows; rows that cannot be parsed are logged and skipped.
    pub fn from_reader<R: Read>(reader: R, offset: FixedOffset) -> Result<Self, ProfileError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut points = Vec::new();
        for record in rdr.records() {
            let record = record?;
            match parse_row(&record, offset) {
                Some(point) => points.push(point),
                None => tracing::error!("invalid line in CSV: {:?}", record),
            }
        }
        Ok(Self::new(points))
    }

    pub fn from_path(path: impl AsRef<Path>, offset: FixedOffset) -> Result<Self, ProfileError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, offset)
    }

    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Nearest setpoint to `now`. NaN when `now` is before the first row,
    /// after the last, or the nearest row is `NA`. Ties go to the earlier row.
    pub fn lookup(&self, now: DateTime<Utc>) -> f64 {
        let idx = self.points.partition_point(|p| p.at <= now);
        let left = idx.checked_sub(1).map(|i| &self.points[i]);
        // an exact match is both the left and the right neighbour
        let right = match left {
            Some(p) if p.at == now => Some(p),
            _ => self.points.get(idx),
        };

        let (Some(left), Some(right)) = (left, right) else {
            tracing::warn!("profile does not cover {}", now);
            return f64::NAN;
        };
        let nearest = if now - left.at <= right.at - now { left } else { right };
        nearest.celsius.unwrap_or(f64::NAN)
    }
}

fn parse_row(record: &csv::StringRecord, offset: FixedOffset) -> Option<ProfilePoint> {
    if record.len() != 2 {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&record[0], TIME_FORMAT).ok()?;
    let at = offset.from_local_datetime(&naive).single()?.with_timezone(&Utc);
    let celsius = match &record[1] {
        "NA" => None,
        value => Some(value.parse::<f64>().ok().filter(|v| v.is_finite())?),
    };
    Some(ProfilePoint { at, celsius })
}

/// Anything that can answer "what should the tank be at, now".
pub trait SetpointSource: Send + Sync {
    fn lookup_setpoint(&self, now: DateTime<Utc>) -> Result<f64, ProfileError>;
}

impl SetpointSource for SetpointProfile {
    fn lookup_setpoint(&self, now: DateTime<Utc>) -> Result<f64, ProfileError> {
        Ok(self.lookup(now))
    }
}

/// A fixed setpoint, for bench runs without a profile.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSetpoint(pub f64);

impl SetpointSource for ConstantSetpoint {
    fn lookup_setpoint(&self, _now: DateTime<Utc>) -> Result<f64, ProfileError> {
        Ok(self.0)
    }
}

/// Profile CSV on disk, re-parsed whenever the file's modification time
/// changes (a new upload).
#[derive(Debug)]
pub struct ProfileFile {
    path: PathBuf,
    offset: FixedOffset,
    cache: Mutex<Option<(SystemTime, SetpointProfile)>>,
}

impl ProfileFile {
    pub fn new(path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        Self {
            path: path.into(),
            offset,
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &crate::config::ProfileConfig) -> Result<Self, ProfileError> {
        Ok(Self::new(&config.path, utc_offset(config.utc_offset_hours)?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current profile, re-read from disk if the file changed.
    pub fn profile(&self) -> Result<SetpointProfile, ProfileError> {
        let modified = std::fs::metadata(&self.path)?.modified()?;
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match cache.as_ref() {
            Some((stamp, profile)) if *stamp == modified => Ok(profile.clone()),
            _ => {
                let profile = SetpointProfile::from_path(&self.path, self.offset)?;
                tracing::info!("loaded {} setpoints from {}", profile.len(), self.path.display());
                *cache = Some((modified, profile.clone()));
                Ok(profile)
            }
        }
    }
}

impl SetpointSource for ProfileFile {
    fn lookup_setpoint(&self, now: DateTime<Utc>) -> Result<f64, ProfileError> {
        Ok(self.profile()?.lookup(now))
    }
}
