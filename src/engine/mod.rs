pub mod assignment;
pub mod deadline;
pub mod poller;
pub mod queue;
pub mod reclaimer;
