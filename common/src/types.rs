use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    #[serde(rename = "Default")]
    Normal,
    #[serde(rename = "Inverted")]
    Rotated,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Default",
            Self::Rotated => "Inverted",
        }
    }

    pub fn from_form_value(value: &str) -> Option<Self> {
        match value.trim() {
            "Default" => Some(Self::Normal),
            "Inverted" => Some(Self::Rotated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl LocalTime {
    pub fn format_hms(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClockStatus {
    pub time: Option<String>,
    #[serde(rename = "offsetSeconds")]
    pub offset_seconds: i32,
    #[serde(rename = "offsetValid")]
    pub offset_valid: bool,
    pub orientation: &'static str,
    #[serde(rename = "needsRefresh")]
    pub needs_refresh: bool,
    #[serde(rename = "refreshAttempts")]
    pub refresh_attempts: u64,
    #[serde(rename = "refreshFailures")]
    pub refresh_failures: u64,
    #[serde(rename = "lastRefreshError")]
    pub last_refresh_error: Option<String>,
    pub segments: [u8; 4],
}
