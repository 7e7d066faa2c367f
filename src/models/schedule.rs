use chrono::{DateTime, Days, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::ScheduleType;
use crate::utils::error::{AppError, Result};

/// Time-of-day window (UTC hours) in which a schedule may fire.
/// `start == end` means all day; `start > end` wraps midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ActiveHours {
    #[validate(range(max = 23))]
    pub start_hour: u8,
    #[validate(range(max = 23))]
    pub end_hour: u8,
}

impl ActiveHours {
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self> {
        let hours = Self {
            start_hour,
            end_hour,
        };
        hours.validate()?;
        Ok(hours)
    }

    pub fn contains(&self, hour: u32) -> bool {
        let (start, end) = (self.start_hour as u32, self.end_hour as u32);
        if start == end {
            true
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Number of hours in the window.
    pub fn hours(&self) -> u32 {
        if self.start_hour == self.end_hour {
            24
        } else {
            (self.end_hour as u32 + 24 - self.start_hour as u32) % 24
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ScrapingSchedule {
    pub id: i64,
    pub schedule_type: ScheduleType,
    pub interval_hours: f64,
    pub active_start_hour: Option<i64>,
    pub active_end_hour: Option<i64>,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSchedule {
    pub schedule_type: ScheduleType,
    #[validate(range(min = 0.0166, max = 24.0))]
    pub interval_hours: f64,
    #[validate(nested)]
    pub active_hours: Option<ActiveHours>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateSchedule {
    #[validate(range(min = 0.0166, max = 24.0))]
    pub interval_hours: Option<f64>,
    #[validate(nested)]
    pub active_hours: Option<ActiveHours>,
    #[serde(default)]
    pub clear_active_hours: bool,
    pub enabled: Option<bool>,
}

impl ScrapingSchedule {
    pub fn new(new_schedule: NewSchedule) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            schedule_type: new_schedule.schedule_type,
            interval_hours: new_schedule.interval_hours,
            active_start_hour: new_schedule.active_hours.map(|h| h.start_hour as i64),
            active_end_hour: new_schedule.active_hours.map(|h| h.end_hour as i64),
            enabled: new_schedule.enabled.unwrap_or(true),
            last_run: None,
            next_run: None,
            consecutive_failures: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update(&mut self, update: UpdateSchedule) {
        if let Some(interval_hours) = update.interval_hours {
            self.interval_hours = interval_hours;
        }
        if update.clear_active_hours {
            self.active_start_hour = None;
            self.active_end_hour = None;
        } else if let Some(hours) = update.active_hours {
            self.active_start_hour = Some(hours.start_hour as i64);
            self.active_end_hour = Some(hours.end_hour as i64);
        }
        if let Some(enabled) = update.enabled {
            if enabled && !self.enabled {
                self.consecutive_failures = 0;
                self.last_error = None;
            }
            self.enabled = enabled;
        }

        self.updated_at = Utc::now();
    }

    pub fn active_hours(&self) -> Option<ActiveHours> {
        match (self.active_start_hour, self.active_end_hour) {
            (Some(start), Some(end)) if (0..24).contains(&start) && (0..24).contains(&end) => {
                Some(ActiveHours {
                    start_hour: start as u8,
                    end_hour: end as u8,
                })
            }
            _ => None,
        }
    }

    pub fn is_within_active_hours(&self, at: DateTime<Utc>) -> bool {
        self.active_hours()
            .map(|h| h.contains(at.hour()))
            .unwrap_or(true)
    }

    /// Interval in whole minutes. Only divisors of an hour or whole hours
    /// produce a fixed daily pattern, anything else is rejected.
    pub fn interval_minutes(&self) -> Result<u32> {
        let minutes = (self.interval_hours * 60.0).round();
        if !minutes.is_finite() || minutes < 1.0 || minutes > 1440.0 {
            return Err(AppError::Validation(format!(
                "interval of {} hours is out of range",
                self.interval_hours
            )));
        }

        let minutes = minutes as u32;
        let fits = if minutes < 60 {
            60 % minutes == 0
        } else {
            minutes % 60 == 0
        };
        if !fits {
            return Err(AppError::Validation(format!(
                "interval of {} minutes must divide an hour or be whole hours",
                minutes
            )));
        }

        Ok(minutes)
    }

    /// Every time of day at which the schedule fires, ascending.
    pub fn daily_slots(&self) -> Result<Vec<NaiveTime>> {
        let minutes = self.interval_minutes()?;
        let window = self.active_hours();
        let mut slots = Vec::new();

        if minutes < 60 {
            for hour in (0..24).filter(|h| window.map_or(true, |w| w.contains(*h))) {
                for minute in (0..60).step_by(minutes as usize) {
                    slots.extend(NaiveTime::from_hms_opt(hour, minute, 0));
                }
            }
        } else {
            let step = (minutes / 60) as usize;
            let start = window.map(|w| w.start_hour as u32).unwrap_or(0);
            let len = window.map(|w| w.hours()).unwrap_or(24);
            for offset in (0..len).step_by(step) {
                slots.extend(NaiveTime::from_hms_opt((start + offset) % 24, 0, 0));
            }
        }

        slots.sort();
        slots.dedup();
        Ok(slots)
    }

    /// Six-field cron expression (`sec min hour dom mon dow`) firing on
    /// exactly [`Self::daily_slots`].
    pub fn cron_expression(&self) -> Result<String> {
        let slots = self.daily_slots()?;

        let mut minutes: Vec<u32> = slots.iter().map(|s| s.minute()).collect();
        minutes.sort();
        minutes.dedup();
        let mut hours: Vec<u32> = slots.iter().map(|s| s.hour()).collect();
        hours.sort();
        hours.dedup();

        let join = |values: &[u32]| {
            values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };

        Ok(format!("0 {} {} * * *", join(&minutes), join(&hours)))
    }

    /// First slot strictly after `after`.
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let slots = self.daily_slots()?;
        let today = after.date_naive();

        for day in [Some(today), today.checked_add_days(Days::new(1))]
            .into_iter()
            .flatten()
        {
            if let Some(slot) = slots
                .iter()
                .map(|slot| day.and_time(*slot).and_utc())
                .find(|candidate| *candidate > after)
            {
                return Ok(slot);
            }
        }

        Err(AppError::Internal(format!(
            "schedule {} has no upcoming slot",
            self.id
        )))
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Returns `true` when this failure disabled the schedule.
    pub fn record_failure(
        &mut self,
        at: DateTime<Utc>,
        error: impl Into<String>,
        max_consecutive_failures: u32,
    ) -> bool {
        self.last_run = Some(at);
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();

        if max_consecutive_failures > 0
            && self.enabled
            && self.consecutive_failures >= max_consecutive_failures as i64
        {
            self.enabled = false;
            return true;
        }
        false
    }
}
