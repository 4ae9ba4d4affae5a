/// Hourly offset refresh policy.
///
/// Armed whenever the minute-of-hour is past zero; fires on the next minute
/// zero and keeps firing every tick of that minute until a refresh succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshScheduler {
    needs_refresh: bool,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn advance<T, E>(
        &mut self,
        minute: u8,
        refresh: impl FnOnce() -> Result<T, E>,
    ) -> Option<Result<T, E>> {
        if self.needs_refresh && minute == 0 {
            let result = refresh();
            self.needs_refresh = result.is_err();
            return Some(result);
        }

        if minute > 0 {
            self.needs_refresh = true;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(
        scheduler: &mut RefreshScheduler,
        minutes: impl IntoIterator<Item = u8>,
        succeed: bool,
    ) -> Vec<usize> {
        let mut calls = Vec::new();
        for (tick, minute) in minutes.into_iter().enumerate() {
            let attempted = scheduler.advance(minute, || if succeed { Ok(()) } else { Err(()) });
            if attempted.is_some() {
                calls.push(tick);
            }
        }
        calls
    }

    #[test]
    fn one_refresh_per_hour_boundary() {
        let mut scheduler = RefreshScheduler::new();
        let minutes: Vec<u8> = [0, 0].into_iter().chain(1..=59).chain([0]).collect();
        let last_tick = minutes.len() - 1;

        let calls = run(&mut scheduler, minutes, true);

        assert_eq!(calls, vec![last_tick]);
        assert!(!scheduler.needs_refresh());
    }

    #[test]
    fn satisfied_hour_does_not_refresh_again_during_minute_zero() {
        let mut scheduler = RefreshScheduler::new();
        let calls = run(&mut scheduler, [59, 0, 0, 0, 0], true);

        assert_eq!(calls, vec![1]);
    }

    #[test]
    fn failures_retry_every_tick_while_minute_is_zero() {
        let mut scheduler = RefreshScheduler::new();
        let calls = run(&mut scheduler, [58, 59, 0, 0, 0, 0], false);

        assert_eq!(calls, vec![2, 3, 4, 5]);
        assert!(scheduler.needs_refresh());
    }

    #[test]
    fn failed_hour_stays_armed_for_the_next_boundary() {
        let mut scheduler = RefreshScheduler::new();
        run(&mut scheduler, [59, 0], false);
        assert!(scheduler.needs_refresh());

        let calls = run(&mut scheduler, [1, 2, 0], true);
        assert_eq!(calls, vec![2]);
        assert!(!scheduler.needs_refresh());
    }

    #[test]
    fn recovers_mid_minute_after_failures() {
        let mut scheduler = RefreshScheduler::new();
        run(&mut scheduler, [30, 0, 0], false);

        let calls = run(&mut scheduler, [0, 0, 0], true);

        assert_eq!(calls, vec![0]);
    }
}
