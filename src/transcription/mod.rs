// Transcription module
// Audio-to-MIDI transcription, MIDI reading, and grid quantization

pub mod client;
pub mod midi;
pub mod quantize;

pub use client::{BasicPitchTranscriber, Transcriber, TranscriberThresholds, TranscriptionError};
pub use midi::{read_notes, MidiNote, MidiReadError};
pub use quantize::{pitch_name, GridQuantizer, QuantizeError, Quantizer, DEFAULT_QUARTER_DIVISOR};
