//! Backpressured playback
//!
//! [`PlaybackConsumer`] lives in the audio callback and owns the ring.
//! [`PlaybackProducer`] lives on the coordinator side and only pushes what
//! the consumer last advertised. The two halves talk exclusively through
//! channels.

pub mod consumer;
pub mod producer;
pub mod ring;

pub use consumer::{PlaybackConsumer, PlayerCommand, PlayerHandle, playback_channel};
pub use producer::PlaybackProducer;
pub use ring::{CapacityUpdate, PlaybackRing, PlayerEvent};
