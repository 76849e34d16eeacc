pub mod backends;
mod connection;
pub mod repository;
pub(crate) mod schema;
#[cfg(test)]
pub(crate) mod testing;
pub mod traits;

pub use backends::libsql::LibSqlBackend;
pub use connection::Database;
pub use traits::*;
