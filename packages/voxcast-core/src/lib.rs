//! Voxcast Core - shared library for the Voxcast avatar broadcast server.
//!
//! This crate drives a continuously-running RTMP broadcast of an animated
//! avatar: a pool of short pre-rendered motion clips is composited on demand
//! with synthesized speech audio and spliced seamlessly into a live idle
//! loop.
//!
//! # Architecture
//!
//! - [`config`]: resolved runtime configuration (directories, tool paths).
//! - [`preset`]: preset definitions and the motion-clip pool resolver.
//! - [`media`]: `ffmpeg`/`ffprobe` subprocess wrapper and playlist writer.
//! - [`planner`]: clip-sequence planning for idle/speech/custom actions.
//! - [`cache`]: content-addressed output cache.
//! - [`tts`] / [`stt`]: speech synthesis and transcription adapters.
//! - [`services`]: the Generation Service, Idle-Loop Controller, and Stream
//!   Service that sit above the building blocks.
//! - [`api`]: HTTP layer (router, handlers, `AppState`).
//! - [`bootstrap`]: composition root wiring all of the above together.
//! - [`error`]: centralized error types.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod media;
pub mod planner;
pub mod preset;
pub mod protocol_constants;
pub mod services;
pub mod stt;
pub mod tts;
pub mod utils;

pub use api::{start_server, AppState, AppStateBuilder, ServerError};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use config::Config;
pub use error::{AppError, AppResult, ErrorCode};
pub use utils::{now_millis, validate_motion_path, MotionPathError};
