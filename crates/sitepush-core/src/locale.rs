//! Process-wide display locale.
//!
//! Set once at startup with [`init`]; read anywhere with [`current`]. Only
//! affects how dates, counts and sizes are rendered in user-facing messages.

use chrono::{DateTime, Local, Utc};
use std::sync::OnceLock;
use std::time::Duration;

/// Formatting rules for one locale.
#[derive(Debug, PartialEq, Eq)]
pub struct DisplayLocale {
    pub tag: &'static str,
    pub datetime_format: &'static str,
    pub group_separator: &'static str,
    pub decimal_separator: &'static str,
}

pub const DEFAULT_TAG: &str = "en-AU";

static LOCALES: &[DisplayLocale] = &[
    DisplayLocale {
        tag: "en-AU",
        datetime_format: "%d/%m/%Y %-I:%M:%S %P",
        group_separator: ",",
        decimal_separator: ".",
    },
    DisplayLocale {
        tag: "en-GB",
        datetime_format: "%d/%m/%Y %H:%M:%S",
        group_separator: ",",
        decimal_separator: ".",
    },
    DisplayLocale {
        tag: "en-US",
        datetime_format: "%-m/%-d/%Y %-I:%M:%S %p",
        group_separator: ",",
        decimal_separator: ".",
    },
    DisplayLocale {
        tag: "de-DE",
        datetime_format: "%d.%m.%Y %H:%M:%S",
        group_separator: ".",
        decimal_separator: ",",
    },
    DisplayLocale {
        tag: "fr-FR",
        datetime_format: "%d/%m/%Y %H:%M:%S",
        group_separator: "\u{202f}",
        decimal_separator: ",",
    },
];

static CURRENT: OnceLock<&'static DisplayLocale> = OnceLock::new();

/// Find a known locale. Matching ignores case and accepts `_` for `-`.
pub fn lookup(tag: &str) -> Option<&'static DisplayLocale> {
    let normalized = tag.trim().replace('_', "-");
    LOCALES
        .iter()
        .find(|l| l.tag.eq_ignore_ascii_case(&normalized))
}

/// Set the process-wide locale. Returns `false` if one was already set.
pub fn init(locale: &'static DisplayLocale) -> bool {
    CURRENT.set(locale).is_ok()
}

/// The process-wide locale, or the default when [`init`] was never called.
pub fn current() -> &'static DisplayLocale {
    CURRENT.get().copied().unwrap_or(&LOCALES[0])
}

impl DisplayLocale {
    /// Render an integer with digit grouping, e.g. `1,234,567`.
    pub fn format_integer(&self, value: u64) -> String {
        let digits = value.to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3 * 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push_str(self.group_separator);
            }
            out.push(c);
        }
        out
    }

    /// Render a byte count with a binary unit and one decimal.
    pub fn format_bytes(&self, bytes: u64) -> String {
        const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
        if bytes < 1024 {
            return format!("{} B", self.format_integer(bytes));
        }
        let mut value = bytes as f64 / 1024.0;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        format!("{} {}", self.format_decimal(value), UNITS[unit])
    }

    /// Render a duration in seconds with one decimal.
    pub fn format_duration(&self, duration: Duration) -> String {
        format!("{} s", self.format_decimal(duration.as_secs_f64()))
    }

    /// Render a timestamp in local time.
    pub fn format_datetime(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&Local)
            .format(self.datetime_format)
            .to_string()
    }

    fn format_decimal(&self, value: f64) -> String {
        let tenths = (value * 10.0).round() as u64;
        format!(
            "{}{}{}",
            self.format_integer(tenths / 10),
            self.decimal_separator,
            tenths % 10
        )
    }
}
