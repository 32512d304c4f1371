pub mod donors;
pub mod events;
pub mod tags;
pub mod users;
