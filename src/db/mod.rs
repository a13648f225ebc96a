mod connection;
mod executor;
mod query;
mod result;

pub use connection::*;
pub use executor::*;
pub use query::*;
pub use result::*;
