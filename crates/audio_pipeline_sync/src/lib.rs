//! Small synchronization primitives shared by the audio pipeline crate.
//!
//! Kept separate from `audio_pipeline` for the same reason Synthizer keeps `audio_synchronization` separate from the
//! main crate: these primitives have nothing audio-specific about them, are individually loom-testable, and are useful
//! to anyone who needs a realtime-safe building block without the rest of the pipeline.
pub mod seqlock;
pub mod sync;
pub mod waiter;

pub use seqlock::SeqlockU64;
pub use waiter::Waiter;
