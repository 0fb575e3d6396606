pub mod channels;
pub mod statistics;
pub mod users;
