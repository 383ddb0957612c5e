pub mod realtime_kpi;

pub use realtime_kpi::{PollSchedule, RealtimeKpiSource};
