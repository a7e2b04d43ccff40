//! MySQL gateway with the reconnect-once discipline.

mod gateway;

pub use gateway::{
    ConnectionSettings, DatabaseError, DatabaseGateway, SelectOptions, SqlValue, UsageError,
};
