use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> AppResult<Date> {
    Date::parse(raw.trim(), time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|_| AppError::invalid(format!("invalid date {raw:?}, expected YYYY-MM-DD")))
}

/// A scheduled time of day, `HH:MM` in 24-hour form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::invalid(format!("invalid time {s:?}, expected HH:MM"));
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        let digits = |pair: &[u8]| -> Option<u8> {
            pair.iter().try_fold(0u8, |acc, b| {
                b.is_ascii_digit().then(|| acc * 10 + (b - b'0'))
            })
        };
        let hour = digits(&bytes[0..2]).ok_or_else(invalid)?;
        let minute = digits(&bytes[3..5]).ok_or_else(invalid)?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl From<Time> for TimeOfDay {
    fn from(t: Time) -> Self {
        Self {
            hour: t.hour(),
            minute: t.minute(),
        }
    }
}

/// Validates and normalizes a schedule: sorted, deduplicated, non-empty.
pub fn parse_times<S: AsRef<str>>(raw: &[S]) -> AppResult<BTreeSet<TimeOfDay>> {
    let times = raw
        .iter()
        .map(|t| t.as_ref().trim().parse::<TimeOfDay>())
        .collect::<AppResult<BTreeSet<_>>>()?;
    if times.is_empty() {
        return Err(AppError::invalid("at least one time is required"));
    }
    Ok(times)
}

pub fn validate_window(start: Date, end: Date) -> AppResult<()> {
    if start > end {
        return Err(AppError::invalid("start_date must not be after end_date"));
    }
    Ok(())
}

/// Wire/storage shape of one day of taken history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenDate {
    #[serde(with = "iso_date")]
    pub date: Date,
    pub times: Vec<TimeOfDay>,
}

/// Per-date set of doses marked taken.
///
/// Serialized as a list of [`TakenDate`] sorted by date descending, with each
/// day's times ascending. Days never hold an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TakenDate>", into = "Vec<TakenDate>")]
pub struct TakenLedger(BTreeMap<Date, BTreeSet<TimeOfDay>>);

impl TakenLedger {
    /// Flips one dose. Returns whether the dose is marked taken afterwards.
    pub fn toggle(&mut self, date: Date, time: TimeOfDay) -> bool {
        let day = self.0.entry(date).or_default();
        let now_taken = if day.remove(&time) {
            false
        } else {
            day.insert(time);
            true
        };
        if day.is_empty() {
            self.0.remove(&date);
        }
        now_taken
    }

    pub fn is_taken(&self, date: Date, time: TimeOfDay) -> bool {
        self.0.get(&date).is_some_and(|day| day.contains(&time))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops marks for times that are no longer scheduled.
    pub fn retain_scheduled(&mut self, scheduled: &BTreeSet<TimeOfDay>) {
        self.0.retain(|_, day| {
            day.retain(|t| scheduled.contains(t));
            !day.is_empty()
        });
    }

    pub fn entries(&self) -> Vec<TakenDate> {
        self.0
            .iter()
            .rev()
            .map(|(date, times)| TakenDate {
                date: *date,
                times: times.iter().copied().collect(),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn times_on(&self, date: Date) -> impl Iterator<Item = &TimeOfDay> {
        self.0.get(&date).into_iter().flatten()
    }
}

impl From<Vec<TakenDate>> for TakenLedger {
    fn from(entries: Vec<TakenDate>) -> Self {
        let mut map: BTreeMap<Date, BTreeSet<TimeOfDay>> = BTreeMap::new();
        for entry in entries {
            map.entry(entry.date).or_default().extend(entry.times);
        }
        map.retain(|_, day| !day.is_empty());
        Self(map)
    }
}

impl From<TakenLedger> for Vec<TakenDate> {
    fn from(ledger: TakenLedger) -> Self {
        ledger.entries()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Medication {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub dose: String,
    pub times: BTreeSet<TimeOfDay>,
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
    pub taken_dates: TakenLedger,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Medication {
    /// Coarse "has any history" flag; not "taken today".
    pub fn taken(&self) -> bool {
        !self.taken_dates.is_empty()
    }

    pub fn covers(&self, date: Date) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Whether `time` on `date` is a dose that still needs a reminder.
    pub fn is_due(&self, date: Date, time: TimeOfDay) -> bool {
        self.times.contains(&time) && self.covers(date) && !self.taken_dates.is_taken(date, time)
    }

    /// Flips one dose; `time` must be part of the schedule.
    pub fn toggle_dose(&mut self, date: Date, time: TimeOfDay) -> AppResult<bool> {
        if !self.times.contains(&time) {
            return Err(AppError::invalid(format!("{time} is not a scheduled time")));
        }
        Ok(self.taken_dates.toggle(date, time))
    }
}

#[derive(Debug, Clone)]
pub struct NewMedication {
    pub owner_id: Uuid,
    pub name: String,
    pub dose: String,
    pub times: BTreeSet<TimeOfDay>,
    pub start_date: Date,
    pub end_date: Date,
}

/// Partial update applied by the owner.
#[derive(Debug, Clone, Default)]
pub struct MedicationPatch {
    pub name: Option<String>,
    pub dose: Option<String>,
    pub times: Option<BTreeSet<TimeOfDay>>,
    pub start_date: Option<Date>,
    pub end_date: Option<Date>,
}

impl MedicationPatch {
    pub fn apply(&self, med: &mut Medication) -> AppResult<()> {
        let start = self.start_date.unwrap_or(med.start_date);
        let end = self.end_date.unwrap_or(med.end_date);
        validate_window(start, end)?;
        if let Some(name) = &self.name {
            med.name = name.clone();
        }
        if let Some(dose) = &self.dose {
            med.dose = dose.clone();
        }
        if let Some(times) = &self.times {
            med.times = times.clone();
            med.taken_dates.retain_scheduled(times);
        }
        med.start_date = start;
        med.end_date = end;
        Ok(())
    }
}
