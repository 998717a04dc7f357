#![forbid(unsafe_code)]

//! Aulos: an adaptive streaming media engine.
//!
//! The engine ingests a manifest (DASH MPD or smooth client manifest,
//! pre-parsed into an intermediate tree), downloads encoded segments,
//! pushes them to a caller-provided media buffer, and continually chooses
//! which quality of which track to fetch next based on throughput, buffer
//! levels and user preferences — while watching playback health
//! (rebuffering, freezes) through a caller-provided media element.
//!
//! The heavy lifting lives in the sibling crates (`aulos-manifest`,
//! `aulos-index`, `aulos-abr`, `aulos-fetch`, `aulos-observer`,
//! `aulos-tracks`); this crate wires them into a running load.

mod config;
mod controls;
mod engine;
mod error;
mod manifest_loader;
mod refresh;
mod sink;
mod stream;

pub use config::{EngineConfig, Tunables};
pub use controls::{AbrControls, AbrSettings};
pub use engine::{Engine, LoadSession};
pub use error::{DrmError, EngineError, EngineResult, MediaError};
pub use manifest_loader::{DocumentIr, ManifestLoader, ManifestParser};
pub use refresh::{next_refresh_delay, RefreshReason, RefreshSignal};
pub use sink::MediaBufferSink;
pub use stream::StreamTask;

pub use aulos_events::{Event, EventBus};
pub use aulos_manifest::{Manifest, MediaType};
pub use aulos_observer::{MediaElement, Observation, PlaybackObserver};
