// Flavor-window math for the tray menu. Beans rest after roasting, peak
// inside their flavor window, fade for two weeks past it and then count as
// expired. Frozen beans are outside the clock entirely.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Days after roasting before the flavor window opens, when the bean does
/// not specify its own.
pub const DEFAULT_START_DAY: i32 = 7;
/// Last day of the flavor window by default.
pub const DEFAULT_END_DAY: i32 = 30;
/// Days past the window end during which a bean is fading rather than
/// expired.
pub const FADING_GRACE_DAYS: i32 = 14;

/// Bean fields the tray cares about; the frontend owns the full record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoffeeBean {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub remaining: Option<String>,
    #[serde(default)]
    pub capacity: Option<String>,
    #[serde(default)]
    pub roast_date: Option<String>,
    #[serde(default)]
    pub start_day: Option<i32>,
    #[serde(default)]
    pub end_day: Option<i32>,
    #[serde(default)]
    pub is_frozen: Option<bool>,
}

impl CoffeeBean {
    /// Remaining grams, treating missing or unparsable values as empty.
    pub fn remaining_grams(&self) -> f64 {
        self.remaining
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    Resting,
    Optimal,
    Fading,
    Expired,
    Frozen,
}

#[derive(Debug, Clone)]
pub struct BeanFreshness {
    pub bean: CoffeeBean,
    pub days_since_roast: i32,
    pub start_day: i32,
    pub end_day: i32,
    pub state: FreshnessState,
}

impl BeanFreshness {
    pub fn days_until_optimal(&self) -> i32 {
        self.start_day - self.days_since_roast
    }

    pub fn days_left_in_window(&self) -> i32 {
        self.end_day - self.days_since_roast
    }

    pub fn days_past_window(&self) -> i32 {
        self.days_since_roast - self.end_day
    }
}

/// Classifies a bean relative to `today`. An unparsable or missing roast
/// date counts as roasted today, which keeps new entries in the resting
/// bucket instead of guessing.
pub fn assess(bean: &CoffeeBean, today: NaiveDate) -> BeanFreshness {
    let days_since_roast = bean
        .roast_date
        .as_deref()
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .map(|date| (today - date).num_days() as i32)
        .unwrap_or(0);

    let start_day = bean.start_day.unwrap_or(DEFAULT_START_DAY);
    let end_day = bean.end_day.unwrap_or(DEFAULT_END_DAY);

    let state = if bean.is_frozen.unwrap_or(false) {
        FreshnessState::Frozen
    } else if days_since_roast < start_day {
        FreshnessState::Resting
    } else if days_since_roast <= end_day {
        FreshnessState::Optimal
    } else if days_since_roast <= end_day + FADING_GRACE_DAYS {
        FreshnessState::Fading
    } else {
        FreshnessState::Expired
    };

    BeanFreshness {
        bean: bean.clone(),
        days_since_roast,
        start_day,
        end_day,
        state,
    }
}

/// Formats a gram amount for the tray, switching to kilograms at 1000 g.
pub fn format_grams(grams: f64) -> String {
    if grams >= 1000.0 {
        format!("{:.2}kg", grams / 1000.0)
    } else {
        format!("{}g", grams as i32)
    }
}

/// Truncates and pads a bean name to a fixed display width. CJK characters
/// count as two columns so mixed-script menus stay aligned.
pub fn truncate_name(name: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut result = String::new();
    for c in name.chars() {
        let char_width = if c.is_ascii() { 1 } else { 2 };
        if width + char_width > max_width {
            result.push('…');
            break;
        }
        result.push(c);
        width += char_width;
    }
    while width < max_width {
        result.push(' ');
        width += 1;
    }
    result
}
