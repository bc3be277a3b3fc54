pub mod connection;
pub mod persistence;
pub mod record;

pub use connection::*;
pub use persistence::Assignments;
pub use record::{Pk, Record};
