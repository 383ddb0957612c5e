pub mod postgres_daily;
pub mod postgres_realtime;

pub use postgres_daily::PgDailyStore;
pub use postgres_realtime::PgRealtimeSink;
