//! Terminal output for the CLI

pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, success, summary_row};
pub use progress::Spinner;
pub use table::{alarm_table, new_issues_table, stats_table, summary_table};
pub use theme::theme;
