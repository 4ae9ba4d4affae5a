use crate::{engine::ClockEngine, types::Orientation};

pub const APPLY_REDIRECT_LOCATION: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        orientation: Orientation,
        changed: bool,
    },
    InvalidOrientation,
    PersistFailed,
}

impl ApplyOutcome {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Applied { .. } => 302,
            Self::InvalidOrientation => 400,
            Self::PersistFailed => 500,
        }
    }

    pub fn location(self) -> Option<&'static str> {
        match self {
            Self::Applied { .. } => Some(APPLY_REDIRECT_LOCATION),
            _ => None,
        }
    }

    pub fn error_message(self) -> Option<&'static str> {
        match self {
            Self::Applied { .. } => None,
            Self::InvalidOrientation => Some("Invalid orientation. Use 'Default' or 'Inverted'"),
            Self::PersistFailed => Some("Failed to persist orientation"),
        }
    }
}

pub fn requested_orientation(value: Option<&str>) -> Result<Orientation, ApplyOutcome> {
    value
        .and_then(Orientation::from_form_value)
        .ok_or(ApplyOutcome::InvalidOrientation)
}

/// Second half of `/apply`, called with the result of persisting
/// `orientation`. The engine only changes once the value is stored.
pub fn commit<E>(
    engine: &mut ClockEngine,
    orientation: Orientation,
    persisted: &Result<(), E>,
) -> ApplyOutcome {
    if persisted.is_err() {
        return ApplyOutcome::PersistFailed;
    }

    ApplyOutcome::Applied {
        orientation,
        changed: engine.set_orientation(orientation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClockConfig;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct MemoryStore {
        saved: Option<Orientation>,
        writes: usize,
        failing: bool,
    }

    impl MemoryStore {
        fn save(&mut self, orientation: Orientation) -> Result<(), &'static str> {
            self.writes += 1;
            if self.failing {
                return Err("storage unavailable");
            }
            self.saved = Some(orientation);
            Ok(())
        }
    }

    fn apply(
        engine: &mut ClockEngine,
        store: &mut MemoryStore,
        value: Option<&str>,
    ) -> ApplyOutcome {
        let orientation = match requested_orientation(value) {
            Ok(orientation) => orientation,
            Err(outcome) => return outcome,
        };
        let persisted = store.save(orientation);
        commit(engine, orientation, &persisted)
    }

    fn engine() -> ClockEngine {
        ClockEngine::new(ClockConfig::default(), Orientation::Normal)
    }

    #[test]
    fn valid_request_persists_and_redirects_home() {
        let mut engine = engine();
        let mut store = MemoryStore::default();

        let outcome = apply(&mut engine, &mut store, Some("Inverted"));

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                orientation: Orientation::Rotated,
                changed: true
            }
        );
        assert_eq!(outcome.status_code(), 302);
        assert_eq!(outcome.location(), Some("/"));
        assert_eq!(store.saved, Some(Orientation::Rotated));
        assert_eq!(engine.orientation(), Orientation::Rotated);
    }

    #[test]
    fn unchanged_value_is_still_persisted() {
        let mut engine = engine();
        let mut store = MemoryStore::default();

        let outcome = apply(&mut engine, &mut store, Some("Default"));

        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                orientation: Orientation::Normal,
                changed: false
            }
        );
        assert_eq!(store.writes, 1);
        assert_eq!(store.saved, Some(Orientation::Normal));
    }

    #[test]
    fn unknown_or_missing_value_is_rejected_without_writing() {
        let mut engine = engine();
        let mut store = MemoryStore::default();

        for value in [None, Some(""), Some("Sideways"), Some("inverted")] {
            let outcome = apply(&mut engine, &mut store, value);
            assert_eq!(outcome, ApplyOutcome::InvalidOrientation);
            assert_eq!(outcome.status_code(), 400);
            assert_eq!(outcome.location(), None);
        }

        assert_eq!(store.writes, 0);
        assert_eq!(engine.orientation(), Orientation::Normal);
    }

    #[test]
    fn failed_save_leaves_display_unchanged_and_retry_saves_again() {
        let mut engine = engine();
        let mut store = MemoryStore {
            failing: true,
            ..MemoryStore::default()
        };

        let failed = apply(&mut engine, &mut store, Some("Inverted"));
        assert_eq!(failed, ApplyOutcome::PersistFailed);
        assert_eq!(failed.status_code(), 500);
        assert!(failed.error_message().is_some());
        assert_eq!(engine.orientation(), Orientation::Normal);

        store.failing = false;
        let retried = apply(&mut engine, &mut store, Some("Inverted"));
        assert_eq!(
            retried,
            ApplyOutcome::Applied {
                orientation: Orientation::Rotated,
                changed: true
            }
        );
        assert_eq!(store.writes, 2);
        assert_eq!(store.saved, Some(Orientation::Rotated));
        assert_eq!(engine.orientation(), Orientation::Rotated);
    }
}
