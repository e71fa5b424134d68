pub mod audio;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod flow;
pub mod pipeline;
pub mod playback;
pub mod ports;
pub mod quality;
pub mod session;
pub mod state;
pub mod synthetic;
pub mod text;
pub mod voice;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use config::{GenerationConfig, PipelineConfig, PlaybackConfig, VoiceConfig, load_config};
pub use coordinator::{PlaybackMode, StreamCoordinator};
pub use engine::{AudioSegment, Control, GenerationEngine, SegmentMetrics};
pub use error::{Result, SynthesisError};
pub use pipeline::{Pipeline, PipelineEvent};
pub use playback::{PlaybackConsumer, PlayerEvent, PlayerHandle, playback_channel};
pub use ports::ModelPorts;
pub use session::{Session, SessionEvent, SessionHandle, SessionRequest, SessionState};
pub use synthetic::SyntheticModel;
pub use text::{TextChunk, Tokenizer, WordTokenizer, normalize, prepare_chunks};
pub use voice::VoiceBank;
