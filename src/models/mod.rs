pub mod reading;

pub use reading::{truncate_to_secs, LoadLevel, Popularity, Reading};
