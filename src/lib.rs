//! Progress tracking and offline sync for the KidLingo learning client.
//!
//! The [`progress::ProgressStore`] owns a learner's XP, level, streak and
//! badges and queues every change in a durable [`sync::SyncQueue`]. The
//! [`sync::SyncEngine`] drains that queue whenever the device is online and
//! merges the server's answer back in. [`content::ContentStore`] tracks
//! packages downloaded for offline use.

pub mod clock;
pub mod content;
pub mod progress;
pub mod retry;
pub mod state;
pub mod sync;
