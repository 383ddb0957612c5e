mod daily;
mod plant;
mod realtime;

pub use daily::{GenerationDay, MeterDay};
pub use plant::Plant;
pub use realtime::RealtimeSample;
