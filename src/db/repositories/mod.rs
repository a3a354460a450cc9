pub mod locations;
pub mod readings;
pub mod sync_state;
