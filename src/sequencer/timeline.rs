// Measure and tempo operations
// The tempo track carries Tempo and TimeSig one-shot frames; walking it
// with a cursor yields the signature and tempo in effect at any position,
// which is how measure numbers convert to tics.

use crate::midi::event::Ev;
use crate::sequencer::cursor::SeqPtr;
use crate::sequencer::state::State;
use crate::sequencer::track::Track;
use serde::{Deserialize, Serialize};

/// Beats per measure when no time signature is set.
pub const DEFAULT_BPM: u32 = 4;
/// Tics per beat when no time signature is set.
pub const DEFAULT_TPB: u32 = 96;
/// Tempo when none is set: 120 quarter notes per minute at 96 tics per
/// beat, in microseconds per 24 tics.
pub const DEFAULT_USEC24: u32 = 125_000;

/// Converts a tempo in beats per minute to microseconds per 24 tics, for
/// a beat of `tpb` tics.
pub fn tempo_to_usec24(tempo: u32, tpb: u32) -> u32 {
    assert!(tempo > 0, "tempo must be positive");
    assert!(tpb > 0, "tics per beat must be positive");
    (24 * 60_000_000u64 / (u64::from(tempo) * u64::from(tpb))) as u32
}

/// Position and timing context of a measure boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub tic: u32,
    pub usec24: u32,
    pub bpm: u32,
    pub tpb: u32,
}

impl Track {
    /// Converts a measure number to an absolute tic using the meta events
    /// of the track. Measures past the end of track extend it virtually.
    pub fn find_measure(&self, meas: u32) -> u32 {
        let mut sp = SeqPtr::new(self);
        let residual = sp.skipmeasure(self, meas);
        let tic = sp.tic() + residual;
        log::debug!("find_measure: {meas} -> {tic}");
        tic
    }

    /// Absolute tic, tempo and time signature at the given measure.
    pub fn timeinfo(&self, meas: u32) -> TimeInfo {
        let mut sp = SeqPtr::new(self);
        let residual = sp.skipmeasure(self, meas);
        let tic = sp.tic() + residual;
        // drain the current tic so every meta event is in the state list
        while sp.evget(self).is_some() {}
        let (bpm, tpb) = sp.getsign();
        TimeInfo {
            tic,
            usec24: sp.gettempo(),
            bpm,
            tpb,
        }
    }

    /// Sets the tempo, in beats per minute, from the given measure on,
    /// extending the track if the measure lies past its end. Runs of equal
    /// tempo events further down the track are collapsed.
    pub fn settempo(&mut self, meas: u32, tempo: u32) {
        let mut sp = SeqPtr::new(self);
        let residual = sp.skipmeasure(self, meas);
        if residual > 0 {
            sp.ticput(self, residual);
        }
        let mut slist = sp.statelist().dup();

        // remove the tempo events at the current tic
        while let Some(st) = sp.evdel(self, Some(&mut slist)) {
            if !matches!(st.ev, Ev::Tempo { .. }) {
                sp.evput(self, &st.ev);
            }
        }

        // insert the new tempo if it differs from the one in effect
        let (_, tpb) = sp.getsign();
        let mut usec24 = tempo_to_usec24(tempo, tpb);
        if usec24 != sp.gettempo() {
            sp.evput(self, &Ev::Tempo { usec24 });
        }

        // move the rest of the track, collapsing runs of equal tempos
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            match st.ev {
                Ev::Tempo { usec24: u } if u == usec24 => {}
                ev => {
                    if let Ev::Tempo { usec24: u } = ev {
                        usec24 = u;
                    }
                    sp.evput(self, &ev);
                }
            }
        }
    }

    /// Inserts `amount` blank measures of the `bpm`/`tpb` signature at the
    /// given measure, re-establishing the previous signature afterwards
    /// unless the track already does it.
    pub fn timeins(&mut self, meas: u32, amount: u32, bpm: u32, tpb: u32) {
        assert!(bpm > 0 && bpm <= 0xff, "beats per measure out of range");
        assert!(tpb > 0 && tpb <= 0x3fff, "tics per beat out of range");
        let mut sp = SeqPtr::new(self);
        let residual = sp.skipmeasure(self, meas);
        if residual > 0 {
            sp.ticput(self, residual);
        }
        let mut slist = sp.statelist().dup();

        // write the new signature and the blank measures
        let (save_bpm, save_tpb) = sp.getsign();
        if bpm != save_bpm || tpb != save_tpb {
            sp.evput(
                self,
                &Ev::TimeSig {
                    beats: bpm as u8,
                    tics: tpb as u16,
                },
            );
        }
        sp.ticput(self, bpm * tpb * amount);

        // move the events of the current tic, restoring the old signature
        // unless the track restores it by itself
        loop {
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                if bpm != save_bpm || tpb != save_tpb {
                    sp.evput(
                        self,
                        &Ev::TimeSig {
                            beats: save_bpm as u8,
                            tics: save_tpb as u16,
                        },
                    );
                }
                break;
            };
            if let Ev::TimeSig { beats, tics } = st.ev {
                if u32::from(beats) != bpm || u32::from(tics) != tpb {
                    sp.evput(self, &st.ev);
                }
                break;
            }
            sp.evput(self, &st.ev);
        }

        // move the rest of the track
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            sp.evput(self, &st.ev);
        }
    }

    /// Deletes `amount` measures starting at `meas`. Frames alive at the
    /// cut are restored right after it, either by the events that follow
    /// the cut or from their pre-cut values.
    pub fn timerm(&mut self, meas: u32, amount: u32) {
        // measure the region to delete; a start past the end of the track
        // means there is nothing to remove
        let (tic, mut len) = {
            let mut sp = SeqPtr::new(self);
            if sp.skipmeasure(self, meas) != 0 {
                return;
            }
            let tic = sp.tic();
            sp.skipmeasure(self, amount);
            (tic, sp.tic() - tic)
        };
        log::debug!("timerm: removing {len} tics at {tic}");

        let mut sp = SeqPtr::new(self);
        sp.skip(self, tic);
        let mut slist = sp.statelist().dup();
        for st in slist.iter_mut() {
            st.tag = 1;
        }

        // erase everything inside the region
        loop {
            len -= sp.ticdel(self, len, Some(&mut slist));
            if len == 0 || !sp.evavail(self) {
                break;
            }
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if let Some(s) = slist.get_mut(&st.key()) {
                s.tag = 0;
            }
        }

        // the first tic after the cut may restore frames by itself, before
        // anything is restored by hand
        while sp.evavail(self) {
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            let dup = sp
                .statelist()
                .get(&st.key())
                .map_or(false, |d| d.eq_ev(&st.ev));
            if !dup {
                sp.evput(self, &st.ev);
            }
            if let Some(s) = slist.get_mut(&st.key()) {
                s.tag = 1;
            }
        }

        // restore the remaining frames from their pre-cut values
        let snaps: Vec<State> = slist.iter().copied().collect();
        for st in snaps {
            if st.tag == 0 {
                let dup = sp
                    .statelist()
                    .get(&st.key())
                    .map_or(false, |d| d.eq_ev(&st.ev));
                if !dup {
                    sp.evput(self, &st.ev);
                }
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = 1;
                }
            }
        }

        // copy the rest of the track
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            if !sp.evavail(self) {
                break;
            }
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if let Some(s) = slist.get_mut(&st.key()) {
                s.tag = 1;
            }
            let dup = sp
                .statelist()
                .get(&st.key())
                .map_or(false, |d| d.eq_ev(&st.ev));
            if !dup {
                sp.evput(self, &st.ev);
            }
        }
    }
}
