// MIDI module - event model and selectors

pub mod event;
pub mod spec;

pub use event::{ctl_default, Chan, Ev, FrameKey, Phase, BEND_CENTER};
pub use spec::{EvSpec, EvSpecKind, SpecParseError};
