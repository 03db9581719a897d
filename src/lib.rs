// tickseq - Headless MIDI sequencer core
// Track data structures and the editing primitives built around them. A
// cursor walking a track maintains the full MIDI state at its position,
// so cuts, merges and rewrites never leave stuck notes or orphaned
// controller values.

pub mod midi;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use midi::event::{Chan, Ev, FrameKey, Phase};
pub use midi::spec::{EvSpec, EvSpecKind, SpecParseError};
pub use sequencer::cursor::SeqPtr;
pub use sequencer::state::{State, StateFlags, StateList};
pub use sequencer::timeline::{TimeInfo, DEFAULT_BPM, DEFAULT_TPB, DEFAULT_USEC24};
pub use sequencer::track::Track;
