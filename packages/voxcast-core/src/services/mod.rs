//! Orchestration services sitting above the Preset Resolver, Clip Planner,
//! and Encoder Facade.

pub mod generation_service;
pub mod idle_loop_controller;
pub mod job_dir;
pub mod stream_service;

pub use generation_service::{ActionItem, ActionParams, ActionResult, BatchDefaults, BatchPayload, GenerationOutcome, GenerationService};
pub use idle_loop_controller::IdleLoopController;
pub use job_dir::JobDir;
pub use stream_service::{StreamService, StreamSnapshot};
