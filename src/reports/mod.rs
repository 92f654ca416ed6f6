//! Periodic weather reports for confirmed subscribers.

mod fanout;

pub use fanout::{FanOutSummary, ReportFanOut};
