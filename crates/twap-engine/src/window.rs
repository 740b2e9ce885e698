use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowId {
    TwelveMin,
    ThreeHour,
    ThirtyDay,
}

impl WindowId {
    pub const ALL: [WindowId; 3] = [WindowId::TwelveMin, WindowId::ThreeHour, WindowId::ThirtyDay];

    pub fn as_str(self) -> &'static str {
        match self {
            WindowId::TwelveMin => "twelve_min",
            WindowId::ThreeHour => "three_hour",
            WindowId::ThirtyDay => "thirty_day",
        }
    }

    pub fn default_duration_secs(self) -> u64 {
        match self {
            WindowId::TwelveMin => 12 * 60,
            WindowId::ThreeHour => 3 * 60 * 60,
            WindowId::ThirtyDay => 30 * 24 * 60 * 60,
        }
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WindowId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownWindow(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    pub id: WindowId,
    pub duration_secs: u64,
}

impl WindowSpec {
    pub fn new(id: WindowId, duration_secs: u64) -> Self {
        Self { id, duration_secs }
    }
}

/// The windows tracked by a process. Validated once at startup and shared
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCatalog {
    windows: Vec<WindowSpec>,
}

impl WindowCatalog {
    pub fn new(windows: Vec<WindowSpec>) -> Result<Self, ConfigError> {
        if windows.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for window in &windows {
            if window.duration_secs == 0 {
                return Err(ConfigError::ZeroDuration(window.id));
            }
            if !seen.insert(window.id) {
                return Err(ConfigError::DuplicateWindow(window.id));
            }
        }

        Ok(Self { windows })
    }

    /// Parses `id=seconds` pairs separated by commas, e.g.
    /// `twelve_min=720,three_hour=10800`. A bare id takes its default duration.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let mut windows = Vec::new();

        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let window = match entry.split_once('=') {
                Some((id, secs)) => {
                    let id: WindowId = id.parse()?;
                    let duration_secs =
                        secs.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                            name: "TWAP_WINDOWS",
                            value: entry.to_string(),
                        })?;
                    WindowSpec::new(id, duration_secs)
                }
                None => {
                    let id: WindowId = entry.parse()?;
                    WindowSpec::new(id, id.default_duration_secs())
                }
            };
            windows.push(window);
        }

        Self::new(windows)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowSpec> {
        self.windows.iter()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowSpec> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Duration of the widest window; bounds how much history a rebuild needs.
    pub fn longest_duration(&self) -> u64 {
        self.windows
            .iter()
            .map(|w| w.duration_secs)
            .max()
            .unwrap_or_default()
    }
}

impl Default for WindowCatalog {
    fn default() -> Self {
        Self {
            windows: WindowId::ALL
                .into_iter()
                .map(|id| WindowSpec::new(id, id.default_duration_secs()))
                .collect(),
        }
    }
}
