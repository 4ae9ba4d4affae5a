use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    clock::OffsetClock,
    config::ClockConfig,
    display::{self, DigitSegments},
    offset::{OffsetError, TimeApiClient, TimeOffset, TimeOffsetResolver},
    scheduler::RefreshScheduler,
    types::{ClockStatus, LocalTime, Orientation},
};

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub time: LocalTime,
    pub segments: DigitSegments,
    pub refresh: Option<Result<TimeOffset, OffsetError>>,
}

#[derive(Debug, Clone)]
pub struct ClockEngine {
    pub config: ClockConfig,
    clock: OffsetClock,
    scheduler: RefreshScheduler,
    orientation: Orientation,
    last_segments: DigitSegments,
    refresh_attempts: u64,
    refresh_failures: u64,
    last_refresh_error: Option<String>,
}

impl ClockEngine {
    pub fn new(config: ClockConfig, orientation: Orientation) -> Self {
        Self {
            config,
            clock: OffsetClock::new(),
            scheduler: RefreshScheduler::new(),
            orientation,
            last_segments: [0; 4],
            refresh_attempts: 0,
            refresh_failures: 0,
            last_refresh_error: None,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Orientation) -> bool {
        if self.orientation != orientation {
            self.orientation = orientation;
            true
        } else {
            false
        }
    }

    pub fn offset(&self) -> Option<TimeOffset> {
        self.clock.offset()
    }

    pub fn is_ready(&self) -> bool {
        self.clock.has_offset()
    }

    pub fn needs_refresh(&self) -> bool {
        self.scheduler.needs_refresh()
    }

    pub fn last_segments(&self) -> DigitSegments {
        self.last_segments
    }

    pub fn local_time(&self, utc: DateTime<Utc>) -> Option<LocalTime> {
        self.clock.local_time(utc)
    }

    /// Blocks until the first offset has been applied. `on_retry` is called
    /// after every failed attempt and is expected to wait `delay` before
    /// returning. Returns the number of GETs issued.
    pub fn boot<C: TimeApiClient>(
        &mut self,
        resolver: &mut TimeOffsetResolver<C>,
        mut on_retry: impl FnMut(u32, &OffsetError, Duration),
    ) -> u32 {
        let delay = Duration::from_millis(self.config.boot_retry_delay_ms);
        let mut attempt = 0_u32;

        loop {
            attempt = attempt.saturating_add(1);
            match self.refresh_offset(resolver) {
                Ok(_) => return attempt,
                Err(err) => on_retry(attempt, &err, delay),
            }
        }
    }

    pub fn tick<C: TimeApiClient>(
        &mut self,
        utc: DateTime<Utc>,
        resolver: &mut TimeOffsetResolver<C>,
    ) -> Option<TickOutcome> {
        let observed = self.clock.local_time(utc)?;

        let mut scheduler = self.scheduler;
        let refresh = scheduler.advance(observed.minutes, || self.refresh_offset(resolver));
        self.scheduler = scheduler;

        let time = self.clock.local_time(utc)?;
        let segments = display::render(time.hours, time.minutes, self.orientation);
        self.last_segments = segments;

        Some(TickOutcome {
            time,
            segments,
            refresh,
        })
    }

    pub fn refresh_offset<C: TimeApiClient>(
        &mut self,
        resolver: &mut TimeOffsetResolver<C>,
    ) -> Result<TimeOffset, OffsetError> {
        self.refresh_attempts = self.refresh_attempts.saturating_add(1);
        let result = resolver.refresh(&mut self.clock);

        match &result {
            Ok(_) => self.last_refresh_error = None,
            Err(err) => {
                self.refresh_failures = self.refresh_failures.saturating_add(1);
                self.last_refresh_error = Some(err.to_string());
            }
        }
        result
    }

    pub fn status(&self, utc: DateTime<Utc>) -> ClockStatus {
        ClockStatus {
            time: self.clock.local_time(utc).map(|time| time.format_hms()),
            offset_seconds: self.clock.offset().map(TimeOffset::seconds).unwrap_or(0),
            offset_valid: self.clock.has_offset(),
            orientation: self.orientation.as_str(),
            needs_refresh: self.scheduler.needs_refresh(),
            refresh_attempts: self.refresh_attempts,
            refresh_failures: self.refresh_failures,
            last_refresh_error: self.last_refresh_error.clone(),
            segments: self.last_segments,
        }
    }
}
