//! Server side of the job script composer: configuration, the batch system
//! backends and the coordinator tying both to the composer tree.

pub mod config;
pub mod coordinator;
pub mod schedulers;

pub use config::{ConfigErrors, ServerConfig};
pub use coordinator::{Coordinator, CoordinatorError, Resolution, Submission};
pub use schedulers::{JobMap, LoadReport, SchedulerError, Schedulers};
