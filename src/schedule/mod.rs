//! Schedule derivation: end dates, today's todo list and the weekly
//! adherence grid.

pub mod duration;
pub mod todos;
pub mod week;

pub use duration::compute_end_date;
pub use todos::{active_medications, build_today_todos, progress};
pub use week::{build_week, week_dates};
