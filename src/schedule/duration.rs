use chrono::{Duration, Months, NaiveDate};
use serde::Serialize;

/// End of a course of medication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndDate(pub NaiveDate);

impl EndDate {
    /// `MM/DD/YYYY`, as shown on the review form.
    pub fn display(&self) -> String {
        self.0.format("%m/%d/%Y").to_string()
    }

    /// `YYYY-MM-DD`, as stored and compared.
    pub fn storage(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

/// Computes the end date for a free-text duration such as "2 weeks".
///
/// Units are matched by lowercase substring with precedence month, week, day,
/// so "2 Weeks" has no unit. The count is the leading digits of the first
/// token. Month arithmetic clamps to the last day of the target month. Returns `None` when no unit is present or the
/// count cannot be parsed; callers treat that as an open-ended course.
pub fn compute_end_date(start: NaiveDate, text: &str) -> Option<EndDate> {
    let text = text.trim();
    let end = if text.contains("month") {
        start.checked_add_months(Months::new(leading_count(text)?))?
    } else if text.contains("week") {
        start.checked_add_signed(Duration::days(7 * i64::from(leading_count(text)?)))?
    } else if text.contains("day") {
        start.checked_add_signed(Duration::days(i64::from(leading_count(text)?)))?
    } else {
        return None;
    };
    Some(EndDate(end))
}

fn leading_count(text: &str) -> Option<u32> {
    let token = text.split_whitespace().next()?;
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
