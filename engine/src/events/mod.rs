//! Inbound activity events and the recent-event trail used for frequency analysis

pub mod history;
pub mod types;

pub use history::{EventHistory, RecentEvent, DEFAULT_HISTORY_CAPACITY};
pub use types::{ActivityEvent, EventDetails};
