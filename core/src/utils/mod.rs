/// Small runtime helpers
pub mod timer;

pub use timer::DelayedTask;
