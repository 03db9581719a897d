// MIDI event model
// Normalized channel voice and meta events as the sequencing core sees
// them: one value per event, no wire encoding concerns. The transport is
// responsible for combining MSB/LSB controller pairs and RPN/NRPN
// controller runs into single events before they reach a track.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Center position of the pitch wheel.
pub const BEND_CENTER: u16 = 0x2000;

/// Device and channel pair identifying where a voice event is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chan {
    pub dev: u8,
    pub ch: u8,
}

impl Chan {
    pub fn new(dev: u8, ch: u8) -> Self {
        assert!(ch < 16, "MIDI channel must be < 16");
        Self { dev, ch }
    }
}

impl fmt::Display for Chan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ch)
    }
}

/// Role of an event within its frame.
///
/// A phase is always recomputed from the event and the state of its frame;
/// it is never stored or transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase(u8);

impl Phase {
    /// Opens a frame.
    pub const FIRST: Phase = Phase(1);
    /// Continues an open frame.
    pub const NEXT: Phase = Phase(2);
    /// Terminates a frame.
    pub const LAST: Phase = Phase(4);
    /// One-shot: opens and terminates in a single event.
    pub const FIRST_LAST: Phase = Phase(1 | 4);

    pub fn contains(self, other: Phase) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Frame identity. Two events belong to the same frame iff their keys are
/// equal: notes by pitch, controllers by number, parameters by parameter
/// number, the per-channel frames by channel only, and the meta frames are
/// singletons within a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKey {
    Note { chan: Chan, pitch: u8 },
    Ctl { chan: Chan, num: u8 },
    Xctl { chan: Chan, num: u8 },
    Rpn { chan: Chan, param: u16 },
    Nrpn { chan: Chan, param: u16 },
    Bend { chan: Chan },
    ChanAftertouch { chan: Chan },
    Program { chan: Chan },
    Tempo,
    TimeSig,
}

/// A normalized MIDI event.
///
/// All payloads are 7-bit quantities unless noted. The track sentinel is
/// not an event; track cells store `Option<Ev>` and the sentinel holds
/// `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ev {
    NoteOn { chan: Chan, pitch: u8, vel: u8 },
    NoteOff { chan: Chan, pitch: u8 },
    KeyAftertouch { chan: Chan, pitch: u8, pressure: u8 },
    /// 7-bit continuous controller.
    Ctl { chan: Chan, num: u8, val: u8 },
    /// 14-bit controller, MSB/LSB already combined.
    Xctl { chan: Chan, num: u8, val: u16 },
    /// Registered parameter, 14-bit parameter number and value.
    Rpn { chan: Chan, param: u16, val: u16 },
    /// Non-registered parameter.
    Nrpn { chan: Chan, param: u16, val: u16 },
    /// Pitch wheel, 14-bit, `BEND_CENTER` is neutral.
    Bend { chan: Chan, val: u16 },
    ChanAftertouch { chan: Chan, pressure: u8 },
    Program { chan: Chan, prog: u8 },
    /// Tempo in microseconds per 24 tics.
    Tempo { usec24: u32 },
    /// Time signature: beats per measure and tics per beat.
    TimeSig { beats: u8, tics: u16 },
}

impl Ev {
    /// Channel of a voice event; meta events have none.
    pub fn chan(&self) -> Option<Chan> {
        match *self {
            Ev::NoteOn { chan, .. }
            | Ev::NoteOff { chan, .. }
            | Ev::KeyAftertouch { chan, .. }
            | Ev::Ctl { chan, .. }
            | Ev::Xctl { chan, .. }
            | Ev::Rpn { chan, .. }
            | Ev::Nrpn { chan, .. }
            | Ev::Bend { chan, .. }
            | Ev::ChanAftertouch { chan, .. }
            | Ev::Program { chan, .. } => Some(chan),
            Ev::Tempo { .. } | Ev::TimeSig { .. } => None,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(
            self,
            Ev::NoteOn { .. } | Ev::NoteOff { .. } | Ev::KeyAftertouch { .. }
        )
    }

    /// Phase of the event taken in isolation. A note-on with zero velocity
    /// is a note-off in disguise and classifies as `LAST`. Every non-note
    /// event is a one-shot: the transport has already collapsed multi-event
    /// encodings into single values.
    pub fn phase(&self) -> Phase {
        match *self {
            Ev::NoteOn { vel: 0, .. } | Ev::NoteOff { .. } => Phase::LAST,
            Ev::NoteOn { .. } => Phase::FIRST,
            Ev::KeyAftertouch { .. } => Phase::NEXT,
            _ => Phase::FIRST_LAST,
        }
    }

    pub fn frame_key(&self) -> FrameKey {
        match *self {
            Ev::NoteOn { chan, pitch, .. }
            | Ev::NoteOff { chan, pitch }
            | Ev::KeyAftertouch { chan, pitch, .. } => FrameKey::Note { chan, pitch },
            Ev::Ctl { chan, num, .. } => FrameKey::Ctl { chan, num },
            Ev::Xctl { chan, num, .. } => FrameKey::Xctl { chan, num },
            Ev::Rpn { chan, param, .. } => FrameKey::Rpn { chan, param },
            Ev::Nrpn { chan, param, .. } => FrameKey::Nrpn { chan, param },
            Ev::Bend { chan, .. } => FrameKey::Bend { chan },
            Ev::ChanAftertouch { chan, .. } => FrameKey::ChanAftertouch { chan },
            Ev::Program { chan, .. } => FrameKey::Program { chan },
            Ev::Tempo { .. } => FrameKey::Tempo,
            Ev::TimeSig { .. } => FrameKey::TimeSig,
        }
    }

    /// Copy of the event with note pitches shifted by `halftones`, wrapping
    /// within the 7-bit range. Non-note events are returned unchanged.
    pub fn transposed(&self, halftones: i32) -> Ev {
        let shift = |pitch: u8| ((pitch as i32 + halftones) & 0x7f) as u8;
        match *self {
            Ev::NoteOn { chan, pitch, vel } => Ev::NoteOn {
                chan,
                pitch: shift(pitch),
                vel,
            },
            Ev::NoteOff { chan, pitch } => Ev::NoteOff {
                chan,
                pitch: shift(pitch),
            },
            Ev::KeyAftertouch {
                chan,
                pitch,
                pressure,
            } => Ev::KeyAftertouch {
                chan,
                pitch: shift(pitch),
                pressure,
            },
            ev => ev,
        }
    }
}

impl fmt::Display for Ev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Ev::NoteOn { chan, pitch, vel } => write!(f, "noteon {chan} {pitch} {vel}"),
            Ev::NoteOff { chan, pitch } => write!(f, "noteoff {chan} {pitch}"),
            Ev::KeyAftertouch {
                chan,
                pitch,
                pressure,
            } => write!(f, "kat {chan} {pitch} {pressure}"),
            Ev::Ctl { chan, num, val } => write!(f, "ctl {chan} {num} {val}"),
            Ev::Xctl { chan, num, val } => write!(f, "xctl {chan} {num} {val}"),
            Ev::Rpn { chan, param, val } => write!(f, "rpn {chan} {param} {val}"),
            Ev::Nrpn { chan, param, val } => write!(f, "nrpn {chan} {param} {val}"),
            Ev::Bend { chan, val } => write!(f, "bend {chan} {val}"),
            Ev::ChanAftertouch { chan, pressure } => write!(f, "cat {chan} {pressure}"),
            Ev::Program { chan, prog } => write!(f, "pc {chan} {prog}"),
            Ev::Tempo { usec24 } => write!(f, "tempo {usec24}"),
            Ev::TimeSig { beats, tics } => write!(f, "timesig {beats} {tics}"),
        }
    }
}

/// Neutral value of a 7-bit controller, used when a controller frame is
/// suspended at an arbitrary point.
pub fn ctl_default(num: u8) -> u8 {
    match num {
        7 => 100,     // volume
        8 | 10 => 64, // balance, pan
        11 => 127,    // expression
        _ => 0,
    }
}
