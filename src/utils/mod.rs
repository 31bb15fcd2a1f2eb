pub mod helper;
pub mod scheduler;

pub use scheduler::Scheduler;
