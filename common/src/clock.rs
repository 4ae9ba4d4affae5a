use chrono::{DateTime, Duration, Timelike, Utc};

use crate::{offset::TimeOffset, types::LocalTime};

#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetClock {
    offset: Option<TimeOffset>,
}

impl OffsetClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offset(&mut self, offset: TimeOffset) {
        self.offset = Some(offset);
    }

    pub fn offset(&self) -> Option<TimeOffset> {
        self.offset
    }

    pub fn has_offset(&self) -> bool {
        self.offset.is_some()
    }

    pub fn local_time(&self, utc: DateTime<Utc>) -> Option<LocalTime> {
        let offset = self.offset?;
        let local = utc.checked_add_signed(Duration::seconds(i64::from(offset.seconds())))?;

        Some(LocalTime {
            hours: local.hour() as u8,
            minutes: local.minute() as u8,
            seconds: local.second() as u8,
        })
    }
}
