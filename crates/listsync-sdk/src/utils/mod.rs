pub mod time;

pub use time::{now_utc, now_utc_millis};
