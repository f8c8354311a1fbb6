//! Alarm, countdown timer and stopwatch engine for a desktop clock.
//!
//! The engines are driven by an explicit `now` on every call; the host owns
//! the 1 Hz loop and supplies notification, audio, power and storage
//! collaborators through [`app::Collaborators`].

pub mod alarm;
pub mod app;
pub mod error;
pub mod events;
pub mod headless;
pub mod ids;
pub mod notify;
pub mod platform;
pub mod settings;
pub mod sound;
pub mod stopwatch;
pub mod store;
pub mod timer;
pub mod world_clock;
