pub mod apply;
pub mod clock;
pub mod config;
pub mod display;
pub mod engine;
pub mod form;
pub mod offset;
pub mod pages;
pub mod scheduler;
pub mod types;

pub use apply::ApplyOutcome;
pub use clock::OffsetClock;
pub use config::{ClockConfig, DisplayHardwareConfig, NetworkConfig, RuntimeConfig};
pub use display::{DigitSegments, SegmentDisplay};
pub use engine::{ClockEngine, TickOutcome};
pub use offset::{OffsetError, TimeApiClient, TimeApiResponse, TimeOffset, TimeOffsetResolver};
pub use scheduler::RefreshScheduler;
pub use types::{ClockStatus, LocalTime, Orientation};
