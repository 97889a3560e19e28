pub mod errors;
pub mod postgres;
pub mod redis_stream;
pub mod source;

pub use errors::{StoreError, StoreResult};
pub use postgres::PgOutboxSource;
pub use redis_stream::{RedisSourceOptions, RedisStreamSource};
pub use source::Source;
