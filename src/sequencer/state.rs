// Frame state tracking
// A State collapses all events of one frame seen so far into its current
// value and phase; a StateList is the set of live frames at a cursor
// position. Keeping the list up to date while walking a track is what lets
// the editors cut, merge and rewrite without leaving stuck notes or
// orphaned controller values behind.

use crate::midi::event::{ctl_default, Ev, FrameKey, Phase, BEND_CENTER};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ops::BitOr;

/// Per-state flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags(u8);

impl StateFlags {
    /// The frame appeared during the current tic.
    pub const NEW: StateFlags = StateFlags(1);
    /// The latest update changed the value of the frame.
    pub const CHANGED: StateFlags = StateFlags(2);
    /// The frame is out of order, e.g. a note-off without a note-on.
    pub const BOGUS: StateFlags = StateFlags(4);
    /// A second note-on arrived while the note was still sounding.
    pub const NESTED: StateFlags = StateFlags(8);

    pub fn contains(self, other: StateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: StateFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: StateFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: StateFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for StateFlags {
    type Output = StateFlags;

    fn bitor(self, rhs: StateFlags) -> StateFlags {
        StateFlags(self.0 | rhs.0)
    }
}

/// Summary of one frame up to the cursor position.
///
/// `tag` is editor-local scratch and is never copied by [`StateList::dup`].
/// `pos` and `tic` locate the event that started the frame; they are
/// stamped by the cursor and only ever used for forward walks over cells
/// that are still linked.
#[derive(Debug, Clone, Copy)]
pub struct State {
    pub ev: Ev,
    pub phase: Phase,
    pub flags: StateFlags,
    pub tag: u32,
    pub pos: Option<u32>,
    pub tic: u32,
}

impl State {
    pub fn key(&self) -> FrameKey {
        self.ev.frame_key()
    }

    /// True if `ev` belongs to this frame.
    pub fn matches(&self, ev: &Ev) -> bool {
        self.key() == ev.frame_key()
    }

    /// True if `ev` equals the current value of the frame, payload included.
    pub fn eq_ev(&self, ev: &Ev) -> bool {
        self.ev == *ev
    }

    /// Events that suspend the frame at an arbitrary point by parking it at
    /// its neutral value. Notes cannot be suspended and yield nothing, as do
    /// frames without a neutral value (programs, parameters, meta events);
    /// a frame already sitting at its neutral value needs no event at all.
    pub fn cancel_events(&self) -> Vec<Ev> {
        match self.ev {
            Ev::Ctl { chan, num, val } => {
                let def = ctl_default(num);
                if val != def {
                    vec![Ev::Ctl {
                        chan,
                        num,
                        val: def,
                    }]
                } else {
                    Vec::new()
                }
            }
            Ev::Xctl { chan, num, val } => {
                let def = u16::from(ctl_default(num)) << 7;
                if val != def {
                    vec![Ev::Xctl {
                        chan,
                        num,
                        val: def,
                    }]
                } else {
                    Vec::new()
                }
            }
            Ev::Bend { chan, val } => {
                if val != BEND_CENTER {
                    vec![Ev::Bend {
                        chan,
                        val: BEND_CENTER,
                    }]
                } else {
                    Vec::new()
                }
            }
            Ev::ChanAftertouch { chan, pressure } => {
                if pressure != 0 {
                    vec![Ev::ChanAftertouch { chan, pressure: 0 }]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Events that re-establish the frame at its current value. Notes
    /// cannot be restored and yield nothing.
    pub fn restore_events(&self) -> Vec<Ev> {
        if self.ev.is_note() {
            Vec::new()
        } else {
            vec![self.ev]
        }
    }
}

/// The set of live frames at a cursor position, keyed by frame identity.
#[derive(Debug, Default)]
pub struct StateList {
    states: HashMap<FrameKey, State>,
}

impl StateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn lookup(&self, ev: &Ev) -> Option<&State> {
        self.states.get(&ev.frame_key())
    }

    pub fn get(&self, key: &FrameKey) -> Option<&State> {
        self.states.get(key)
    }

    pub fn get_mut(&mut self, key: &FrameKey) -> Option<&mut State> {
        self.states.get_mut(key)
    }

    pub fn rm(&mut self, key: &FrameKey) -> Option<State> {
        self.states.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut State> {
        self.states.values_mut()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Folds `ev` into the list and returns the state of its frame.
    ///
    /// A looked-up state that is terminated and already observed makes room
    /// for a fresh frame with the same identity. Out-of-order events create
    /// or mark a `BOGUS` state; a note-on over a sounding note marks the
    /// state `NESTED` until the next note-off unwinds it.
    pub fn update(&mut self, ev: &Ev) -> &mut State {
        let key = ev.frame_key();
        let phase = ev.phase();

        if let Some(st) = self.states.get(&key) {
            if st.phase == Phase::LAST && !st.flags.contains(StateFlags::NEW) {
                self.states.remove(&key);
            }
        }
        match self.states.entry(key) {
            Entry::Vacant(entry) => {
                let mut st = State {
                    ev: *ev,
                    phase,
                    flags: StateFlags::NEW,
                    tag: 0,
                    pos: None,
                    tic: 0,
                };
                if phase.contains(Phase::FIRST) {
                    st.phase = if phase.contains(Phase::LAST) {
                        Phase::FIRST_LAST
                    } else {
                        Phase::FIRST
                    };
                } else {
                    // LAST or NEXT with no frame open
                    st.phase = Phase::LAST;
                    st.flags.insert(StateFlags::BOGUS);
                }
                entry.insert(st)
            }
            Entry::Occupied(entry) => {
                let st = entry.into_mut();
                if phase.contains(Phase::FIRST) {
                    if st.phase == Phase::LAST {
                        // the frame ended earlier in this tic and restarts;
                        // the old frame start is no longer meaningful
                        st.flags = StateFlags::NEW;
                        st.pos = None;
                        st.tic = 0;
                        st.phase = if phase.contains(Phase::LAST) {
                            Phase::FIRST_LAST
                        } else {
                            Phase::FIRST
                        };
                    } else if st.phase.contains(Phase::LAST) {
                        // one-shot frame taking a new value
                        if !st.eq_ev(ev) {
                            st.flags.insert(StateFlags::CHANGED);
                        }
                        st.phase = Phase::FIRST_LAST;
                    } else {
                        // note-on while the note is still sounding
                        if !st.eq_ev(ev) {
                            st.flags.insert(StateFlags::CHANGED);
                        }
                        st.flags.insert(StateFlags::NESTED);
                        st.phase = Phase::NEXT;
                    }
                } else if st.phase == Phase::LAST {
                    // continuation of a frame that already ended
                    st.flags.insert(StateFlags::BOGUS);
                } else {
                    if !st.eq_ev(ev) {
                        st.flags.insert(StateFlags::CHANGED);
                    }
                    if phase.contains(Phase::LAST) {
                        st.flags.remove(StateFlags::NESTED);
                    }
                    st.phase = phase;
                }
                st.ev = *ev;
                st
            }
        }
    }

    /// Ends the current tic: purges states terminated before this tic and
    /// clears the per-tic flags on the survivors.
    pub fn outdate(&mut self) {
        self.states.retain(|_, st| {
            st.phase != Phase::LAST || st.flags.contains(StateFlags::NEW)
        });
        for st in self.states.values_mut() {
            st.flags.remove(StateFlags::NEW);
            st.flags.remove(StateFlags::CHANGED);
        }
    }

    /// Copy holding only the behavioural fields: event, phase, and flags
    /// minus `NEW` and `CHANGED`. Tags and frame positions are not copied.
    pub fn dup(&self) -> StateList {
        let states = self
            .states
            .iter()
            .map(|(key, st)| {
                let mut flags = st.flags;
                flags.remove(StateFlags::NEW);
                flags.remove(StateFlags::CHANGED);
                (
                    *key,
                    State {
                        ev: st.ev,
                        phase: st.phase,
                        flags,
                        tag: 0,
                        pos: None,
                        tic: 0,
                    },
                )
            })
            .collect();
        StateList { states }
    }
}

impl Drop for StateList {
    fn drop(&mut self) {
        for st in self.states.values() {
            if !st.phase.contains(Phase::LAST) {
                log::warn!("statelist: {}: unterminated frame", st.ev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::Chan;

    fn chan() -> Chan {
        Chan::new(0, 0)
    }

    fn note_on(pitch: u8, vel: u8) -> Ev {
        Ev::NoteOn {
            chan: chan(),
            pitch,
            vel,
        }
    }

    fn note_off(pitch: u8) -> Ev {
        Ev::NoteOff {
            chan: chan(),
            pitch,
        }
    }

    fn cc(num: u8, val: u8) -> Ev {
        Ev::Ctl {
            chan: chan(),
            num,
            val,
        }
    }

    #[test]
    fn test_note_lifecycle() {
        let mut slist = StateList::new();

        let st = slist.update(&note_on(60, 100));
        assert_eq!(st.phase, Phase::FIRST);
        assert!(st.flags.contains(StateFlags::NEW));

        slist.outdate();
        let st = slist.update(&note_off(60));
        assert_eq!(st.phase, Phase::LAST);
        assert!(!st.flags.contains(StateFlags::NEW));

        slist.outdate();
        assert!(slist.is_empty());
    }

    #[test]
    fn test_one_shot_keeps_its_value() {
        let mut slist = StateList::new();
        slist.update(&cc(7, 100));
        slist.outdate();
        slist.outdate();
        // controller states survive so the current value stays known
        let st = slist.lookup(&cc(7, 0)).expect("state kept");
        assert_eq!(st.ev, cc(7, 100));
        assert_eq!(st.phase, Phase::FIRST_LAST);
    }

    #[test]
    fn test_changed_on_new_value() {
        let mut slist = StateList::new();
        slist.update(&cc(7, 100));
        slist.outdate();
        let st = slist.update(&cc(7, 100));
        assert!(!st.flags.contains(StateFlags::CHANGED));
        let st = slist.update(&cc(7, 50));
        assert!(st.flags.contains(StateFlags::CHANGED));
        slist.outdate();
        let st = slist.lookup(&cc(7, 0)).unwrap();
        assert!(!st.flags.contains(StateFlags::CHANGED));
    }

    #[test]
    fn test_bogus_note_off() {
        let mut slist = StateList::new();
        let st = slist.update(&note_off(60));
        assert!(st.flags.contains(StateFlags::BOGUS));
        assert_eq!(st.phase, Phase::LAST);
        slist.outdate();
        slist.outdate();
        assert!(slist.is_empty());
    }

    #[test]
    fn test_nested_note_on_unwinds_on_note_off() {
        let mut slist = StateList::new();
        slist.update(&note_on(60, 100));
        slist.outdate();

        let st = slist.update(&note_on(60, 90));
        assert!(st.flags.contains(StateFlags::NESTED));
        assert_eq!(st.phase, Phase::NEXT);

        let st = slist.update(&note_off(60));
        assert!(!st.flags.contains(StateFlags::NESTED));
        assert_eq!(st.phase, Phase::LAST);
    }

    #[test]
    fn test_frame_restart_within_a_tic() {
        let mut slist = StateList::new();
        slist.update(&note_on(60, 100));
        slist.update(&note_off(60));
        // same tic, the frame starts again before any outdate ran
        let st = slist.update(&note_on(60, 80));
        assert!(st.flags.contains(StateFlags::NEW));
        assert!(!st.flags.contains(StateFlags::NESTED));
        assert_eq!(st.phase, Phase::FIRST);
    }

    #[test]
    fn test_dup_copies_behaviour_not_scratch() {
        let mut slist = StateList::new();
        let st = slist.update(&cc(1, 30));
        st.tag = 7;
        st.pos = Some(3);
        st.tic = 42;

        let copy = slist.dup();
        let st = copy.lookup(&cc(1, 0)).unwrap();
        assert_eq!(st.ev, cc(1, 30));
        assert_eq!(st.phase, Phase::FIRST_LAST);
        assert_eq!(st.tag, 0);
        assert_eq!(st.pos, None);
        assert_eq!(st.tic, 0);
        assert!(!st.flags.contains(StateFlags::NEW));
    }

    #[test]
    fn test_cancel_and_restore_events() {
        let mut slist = StateList::new();
        let st = *slist.update(&cc(1, 30));
        assert_eq!(st.cancel_events(), vec![cc(1, 0)]);
        assert_eq!(st.restore_events(), vec![cc(1, 30)]);

        // a controller already at its neutral value needs no cancel event
        let st = *slist.update(&cc(1, 0));
        assert!(st.cancel_events().is_empty());

        let st = *slist.update(&note_on(60, 100));
        assert!(st.cancel_events().is_empty());
        assert!(st.restore_events().is_empty());
        slist.clear();
    }

    #[test]
    fn test_bend_cancels_to_center() {
        let mut slist = StateList::new();
        let st = *slist.update(&Ev::Bend {
            chan: chan(),
            val: 0x3fff,
        });
        assert_eq!(
            st.cancel_events(),
            vec![Ev::Bend {
                chan: chan(),
                val: BEND_CENTER,
            }]
        );
    }
}
