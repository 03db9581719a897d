// Event selectors
// An EvSpec names a set of frames: a kind, optional device and channel
// ranges, and an optional payload range (pitch, controller number or
// parameter number). Editors use selectors to decide which frames an
// operation applies to; the command interpreter builds them from a small
// text form.

use crate::midi::event::Ev;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvSpecKind {
    Any,
    Note,
    Ctl,
    Xctl,
    Rpn,
    Nrpn,
    Bend,
    ChanAftertouch,
    Program,
    Tempo,
    TimeSig,
}

impl EvSpecKind {
    /// Whether a selector of this kind takes a payload range.
    fn ranged(self) -> bool {
        matches!(
            self,
            EvSpecKind::Note
                | EvSpecKind::Ctl
                | EvSpecKind::Xctl
                | EvSpecKind::Rpn
                | EvSpecKind::Nrpn
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvSpec {
    pub kind: EvSpecKind,
    /// Inclusive device range, `None` matches any device.
    pub dev: Option<(u8, u8)>,
    /// Inclusive channel range.
    pub ch: Option<(u8, u8)>,
    /// Inclusive range over pitch, controller number or parameter number.
    pub v0: Option<(u16, u16)>,
}

impl EvSpec {
    /// Selector matching every event, meta events included.
    pub const ANY: EvSpec = EvSpec {
        kind: EvSpecKind::Any,
        dev: None,
        ch: None,
        v0: None,
    };

    pub fn with_kind(kind: EvSpecKind) -> Self {
        Self {
            kind,
            dev: None,
            ch: None,
            v0: None,
        }
    }

    pub fn matches(&self, ev: &Ev) -> bool {
        if let Some(chan) = ev.chan() {
            if !in_range(self.dev.map(widen), u16::from(chan.dev))
                || !in_range(self.ch.map(widen), u16::from(chan.ch))
            {
                return false;
            }
        }
        match self.kind {
            EvSpecKind::Any => true,
            EvSpecKind::Note => match *ev {
                Ev::NoteOn { pitch, .. }
                | Ev::NoteOff { pitch, .. }
                | Ev::KeyAftertouch { pitch, .. } => in_range(self.v0, u16::from(pitch)),
                _ => false,
            },
            EvSpecKind::Ctl => match *ev {
                Ev::Ctl { num, .. } => in_range(self.v0, u16::from(num)),
                _ => false,
            },
            EvSpecKind::Xctl => match *ev {
                Ev::Xctl { num, .. } => in_range(self.v0, u16::from(num)),
                _ => false,
            },
            EvSpecKind::Rpn => match *ev {
                Ev::Rpn { param, .. } => in_range(self.v0, param),
                _ => false,
            },
            EvSpecKind::Nrpn => match *ev {
                Ev::Nrpn { param, .. } => in_range(self.v0, param),
                _ => false,
            },
            EvSpecKind::Bend => matches!(ev, Ev::Bend { .. }),
            EvSpecKind::ChanAftertouch => matches!(ev, Ev::ChanAftertouch { .. }),
            EvSpecKind::Program => matches!(ev, Ev::Program { .. }),
            EvSpecKind::Tempo => matches!(ev, Ev::Tempo { .. }),
            EvSpecKind::TimeSig => matches!(ev, Ev::TimeSig { .. }),
        }
    }
}

fn widen(r: (u8, u8)) -> (u16, u16) {
    (u16::from(r.0), u16::from(r.1))
}

fn in_range(range: Option<(u16, u16)>, v: u16) -> bool {
    range.map_or(true, |(lo, hi)| v >= lo && v <= hi)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
    #[error("invalid range `{0}`")]
    BadRange(String),
    #[error("`{0}` selectors take no range")]
    UnexpectedRange(String),
}

impl FromStr for EvSpec {
    type Err = SpecParseError;

    /// Parses the compact selector form: a kind keyword optionally followed
    /// by `:lo` or `:lo-hi`, e.g. `any`, `note`, `note:60-72`, `ctl:7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (word, range) = match s.split_once(':') {
            Some((w, r)) => (w, Some(r)),
            None => (s, None),
        };
        let kind = match word {
            "any" => EvSpecKind::Any,
            "note" => EvSpecKind::Note,
            "ctl" => EvSpecKind::Ctl,
            "xctl" => EvSpecKind::Xctl,
            "rpn" => EvSpecKind::Rpn,
            "nrpn" => EvSpecKind::Nrpn,
            "bend" => EvSpecKind::Bend,
            "cat" => EvSpecKind::ChanAftertouch,
            "pc" => EvSpecKind::Program,
            "tempo" => EvSpecKind::Tempo,
            "timesig" => EvSpecKind::TimeSig,
            _ => return Err(SpecParseError::UnknownKind(word.to_string())),
        };
        let v0 = match range {
            None => None,
            Some(r) => {
                if !kind.ranged() {
                    return Err(SpecParseError::UnexpectedRange(word.to_string()));
                }
                Some(parse_range(r)?)
            }
        };
        Ok(EvSpec {
            kind,
            dev: None,
            ch: None,
            v0,
        })
    }
}

fn parse_range(s: &str) -> Result<(u16, u16), SpecParseError> {
    let bad = || SpecParseError::BadRange(s.to_string());
    match s.split_once('-') {
        Some((lo, hi)) => {
            let lo = lo.parse().map_err(|_| bad())?;
            let hi = hi.parse().map_err(|_| bad())?;
            if lo > hi {
                return Err(bad());
            }
            Ok((lo, hi))
        }
        None => {
            let v = s.parse().map_err(|_| bad())?;
            Ok((v, v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::Chan;

    fn note(pitch: u8) -> Ev {
        Ev::NoteOn {
            chan: Chan::new(0, 0),
            pitch,
            vel: 100,
        }
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(EvSpec::ANY.matches(&note(60)));
        assert!(EvSpec::ANY.matches(&Ev::Tempo { usec24: 125_000 }));
    }

    #[test]
    fn test_note_range() {
        let spec: EvSpec = "note:60-72".parse().unwrap();
        assert!(spec.matches(&note(60)));
        assert!(spec.matches(&note(72)));
        assert!(!spec.matches(&note(73)));
        assert!(!spec.matches(&Ev::Ctl {
            chan: Chan::new(0, 0),
            num: 64,
            val: 127,
        }));
    }

    #[test]
    fn test_ctl_by_number() {
        let spec: EvSpec = "ctl:7".parse().unwrap();
        let vol = Ev::Ctl {
            chan: Chan::new(0, 0),
            num: 7,
            val: 90,
        };
        let pan = Ev::Ctl {
            chan: Chan::new(0, 0),
            num: 10,
            val: 64,
        };
        assert!(spec.matches(&vol));
        assert!(!spec.matches(&pan));
    }

    #[test]
    fn test_channel_range() {
        let mut spec = EvSpec::with_kind(EvSpecKind::Note);
        spec.ch = Some((0, 3));
        assert!(spec.matches(&Ev::NoteOn {
            chan: Chan::new(0, 2),
            pitch: 60,
            vel: 1,
        }));
        assert!(!spec.matches(&Ev::NoteOn {
            chan: Chan::new(0, 9),
            pitch: 60,
            vel: 1,
        }));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "drum".parse::<EvSpec>(),
            Err(SpecParseError::UnknownKind("drum".to_string()))
        );
        assert_eq!(
            "note:72-60".parse::<EvSpec>(),
            Err(SpecParseError::BadRange("72-60".to_string()))
        );
        assert_eq!(
            "bend:1".parse::<EvSpec>(),
            Err(SpecParseError::UnexpectedRange("bend".to_string()))
        );
    }
}
