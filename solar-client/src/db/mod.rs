pub mod history_queries;
pub mod realtime_queries;
