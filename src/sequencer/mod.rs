// Sequencer module - tracks, cursors and editing operations

pub mod cursor;
pub mod edit;
pub mod state;
pub mod timeline;
pub mod track;

pub use cursor::SeqPtr;
pub use state::{State, StateFlags, StateList};
pub use timeline::{tempo_to_usec24, TimeInfo, DEFAULT_BPM, DEFAULT_TPB, DEFAULT_USEC24};
pub use track::Track;
