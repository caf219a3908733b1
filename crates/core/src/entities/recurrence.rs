use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Repeat rule attached to timers and templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    pub frequency: Frequency,
    pub interval: u32,
}

impl Recurrence {
    pub fn new(frequency: Frequency, interval: u32) -> Self {
        Self {
            frequency,
            interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(Error::invalid_input("recurrence interval must be at least 1"));
        }
        Ok(())
    }

    /// Next occurrence strictly after `from`.
    pub fn advance(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = i64::from(self.interval.max(1));
        match self.frequency {
            Frequency::Daily => from.checked_add_signed(Duration::days(step)),
            Frequency::Weekly => from.checked_add_signed(Duration::weeks(step)),
            Frequency::Monthly => from.checked_add_months(Months::new(self.interval.max(1))),
            Frequency::Yearly => {
                from.checked_add_months(Months::new(self.interval.max(1).saturating_mul(12)))
            }
        }
    }

    /// First occurrence of the series starting at `target` that lies after `now`.
    pub fn next_after(&self, target: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut next = target;
        while next <= now {
            next = self.advance(next)?;
        }
        Some(next)
    }
}
