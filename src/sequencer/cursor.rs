// Track cursor
// A SeqPtr walks a track tic by tic, keeping a state list that describes
// every frame alive at the current position, like a tape head that knows
// which notes are sounding and what every controller is set to. All track
// reads and writes go through the six primitives below so the state list
// stays exact; there is no way to move backward.
//
// The usual idioms:
//
//   reading: evget() consumes events, ticskip() consumes blank space;
//   writing: evput() appends events, ticput() appends blank space, both
//   only at the end of track;
//   rewriting: evdel()/ticdel() erase at the cursor while a separate
//   "erased" state list records what was removed, and evput()/ticput()
//   write the replacement. A rewrite is only consistent if everything up
//   to the cursor has been erased and rewritten.

use crate::midi::event::{Ev, FrameKey, Phase};
use crate::sequencer::state::{State, StateList};
use crate::sequencer::timeline::{DEFAULT_BPM, DEFAULT_TPB, DEFAULT_USEC24};
use crate::sequencer::track::{CellId, Track};

pub struct SeqPtr {
    pos: CellId,
    delta: u32,
    tic: u32,
    statelist: StateList,
    debug: bool,
}

impl SeqPtr {
    /// Cursor at the beginning of `t`. Invariant violations panic in debug
    /// builds and are logged and skipped otherwise.
    pub fn new(t: &Track) -> Self {
        Self::with_debug(t, cfg!(debug_assertions))
    }

    /// Cursor with an explicit invariant-checking mode, so tests can
    /// exercise the panic paths deterministically.
    pub fn with_debug(t: &Track, debug: bool) -> Self {
        Self {
            pos: t.head(),
            delta: 0,
            tic: 0,
            statelist: StateList::new(),
            debug,
        }
    }

    /// Absolute tic of the current position.
    pub fn tic(&self) -> u32 {
        self.tic
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn statelist(&self) -> &StateList {
        &self.statelist
    }

    pub fn statelist_mut(&mut self) -> &mut StateList {
        &mut self.statelist
    }

    /// True if the end of the track is reached.
    pub fn eot(&self, t: &Track) -> bool {
        let cell = t.cell(self.pos);
        cell.ev.is_none() && self.delta == cell.delta
    }

    /// True if an event is available within the current tic.
    pub fn evavail(&self, t: &Track) -> bool {
        let cell = t.cell(self.pos);
        cell.ev.is_some() && self.delta == cell.delta
    }

    /// Blank tics between the cursor and the next event or the end of
    /// track.
    pub(crate) fn tics_avail(&self, t: &Track) -> u32 {
        t.cell(self.pos).delta - self.delta
    }

    /// Reads the next event of the current tic, folds it into the state
    /// list and returns a snapshot of its state, or `None` if the tic has
    /// no more events. This is the only primitive that advances over an
    /// event.
    pub fn evget(&mut self, t: &Track) -> Option<State> {
        let cell = t.cell(self.pos);
        if self.delta != cell.delta {
            return None;
        }
        let ev = cell.ev?;
        let (pos, tic, next) = (self.pos, self.tic, cell.next);
        let st = self.statelist.update(&ev);
        if st.pos.is_none() && st.phase.contains(Phase::FIRST) {
            st.pos = Some(pos);
            st.tic = tic;
        }
        let snap = *st;
        self.pos = next;
        self.delta = 0;
        Some(snap)
    }

    /// Deletes the next event of the current tic. The cursor does not
    /// advance and its own state list is untouched; if `erased` is given it
    /// is updated as if the event had been read. Returns the erased state,
    /// or `None` when no event is available or no list was given.
    pub fn evdel(&mut self, t: &mut Track, erased: Option<&mut StateList>) -> Option<State> {
        let cell = *t.cell(self.pos);
        if self.delta != cell.delta {
            return None;
        }
        let ev = cell.ev?;
        let snap = erased.map(|slist| *slist.update(&ev));
        t.cell_mut(cell.next).delta += cell.delta;
        t.remove(self.pos);
        self.pos = cell.next;
        snap
    }

    /// Inserts `ev` at the current position, advances just past it and
    /// returns the state of the new event. Only correct at the end of track
    /// or while rewriting everything up to the cursor.
    pub fn evput(&mut self, t: &mut Track, ev: &Ev) -> State {
        let id = t.insert_before(self.pos, self.delta, *ev);
        t.cell_mut(self.pos).delta -= self.delta;
        let tic = self.tic;
        let st = self.statelist.update(ev);
        if st.pos.is_none() && st.phase.contains(Phase::FIRST) {
            st.pos = Some(id);
            st.tic = tic;
        }
        let snap = *st;
        self.delta = 0;
        snap
    }

    /// Moves forward to the next event of the track, but at most `max`
    /// tics. Returns the number of tics skipped; terminated states are
    /// purged whenever time advances.
    pub fn ticskip(&mut self, t: &Track, max: u32) -> u32 {
        let ntics = self.tics_avail(t).min(max);
        if ntics > 0 {
            self.delta += ntics;
            self.tic += ntics;
            self.statelist.outdate();
        }
        ntics
    }

    /// Removes blank space at the current position, with the same
    /// measurement as [`SeqPtr::ticskip`]. The cursor does not move in
    /// time; the `erased` list ends its tic instead.
    pub fn ticdel(&mut self, t: &mut Track, max: u32, erased: Option<&mut StateList>) -> u32 {
        let ntics = self.tics_avail(t).min(max);
        t.cell_mut(self.pos).delta -= ntics;
        if max > 0 {
            if let Some(slist) = erased {
                slist.outdate();
            }
        }
        ntics
    }

    /// Inserts blank space at the current position and advances over it.
    pub fn ticput(&mut self, t: &mut Track, ntics: u32) {
        if ntics > 0 {
            t.cell_mut(self.pos).delta += ntics;
            self.delta += ntics;
            self.tic += ntics;
            self.statelist.outdate();
        }
    }

    /// Moves forward `ntics`, reading as it goes. Returns the remaining
    /// tics if the end of track was reached first.
    pub fn skip(&mut self, t: &Track, mut ntics: u32) -> u32 {
        while !self.eot(t) && ntics > 0 {
            while self.evget(t).is_some() {}
            ntics -= self.ticskip(t, ntics);
        }
        ntics
    }

    /// Moves forward `ntics`, extending the track with blank space if it
    /// ends too early. Used when about to write.
    pub fn seek(&mut self, t: &mut Track, ntics: u32) {
        let remaining = self.skip(t, ntics);
        if remaining > 0 {
            self.ticput(t, remaining);
        }
    }

    /// Writes the events suspending the frame of `st`, which may belong to
    /// any state list. Returns false for frames that cannot be suspended:
    /// notes and frames already terminated.
    pub fn cancel(&mut self, t: &mut Track, st: &State) -> bool {
        if st.ev.is_note() || st.phase == Phase::LAST {
            return false;
        }
        for ev in st.cancel_events() {
            self.evput(t, &ev);
        }
        true
    }

    /// Writes the events re-establishing the frame of `st`. Same contract
    /// as [`SeqPtr::cancel`].
    pub fn restore(&mut self, t: &mut Track, st: &State) -> bool {
        if st.ev.is_note() || st.phase == Phase::LAST {
            return false;
        }
        for ev in st.restore_events() {
            self.evput(t, &ev);
        }
        true
    }

    /// Erases the most recent event of the frame of `st` between the frame
    /// start and the cursor, as if it never existed; the blank space stays.
    /// Returns the updated state, or `None` if that was the only event of
    /// the frame and the state is gone.
    pub fn rmlast(&mut self, t: &mut Track, st: &State) -> Option<State> {
        let key = st.key();
        let Some(start) = self.statelist.get(&key).and_then(|s| s.pos) else {
            if self.debug {
                panic!("rmlast: {}: unknown frame start", st.ev);
            }
            log::warn!("rmlast: {}: unknown frame start, ignored", st.ev);
            return None;
        };
        log::debug!("rmlast: {}: removing last event", st.ev);

        // walk from the frame start to the cursor; `cur` tracks the latest
        // event of the frame, `prev` the one before it within the frame
        let mut cur = start;
        let mut prev: Option<CellId> = None;
        let mut id = start;
        loop {
            id = t.cell(id).next;
            if id == self.pos {
                break;
            }
            if t.cell(id).ev.map_or(false, |e| e.frame_key() == key) {
                prev = Some(cur);
                cur = id;
            }
        }

        let cell = *t.cell(cur);
        t.cell_mut(cell.next).delta += cell.delta;
        if cell.next == self.pos {
            self.delta += cell.delta;
        }
        t.remove(cur);

        match prev {
            None => {
                // that was the first event: the frame never existed
                self.statelist.rm(&key);
                None
            }
            Some(p) => {
                let ev = t.cell(p).ev?;
                let st = self.statelist.get_mut(&key)?;
                st.ev = ev;
                st.phase = if ev.phase() == Phase::FIRST_LAST {
                    Phase::FIRST_LAST
                } else if p == start {
                    Phase::FIRST
                } else {
                    Phase::NEXT
                };
                Some(*st)
            }
        }
    }

    /// Erases every event of the frame of `st` between the frame start and
    /// the cursor, as if the frame never existed, and drops the state.
    /// Always returns `None`, for symmetry with [`SeqPtr::rmlast`].
    pub fn rmprev(&mut self, t: &mut Track, st: &State) -> Option<State> {
        let key = st.key();
        let Some(start) = self.statelist.get(&key).and_then(|s| s.pos) else {
            if self.debug {
                panic!("rmprev: {}: unknown frame start", st.ev);
            }
            log::warn!("rmprev: {}: unknown frame start, ignored", st.ev);
            return None;
        };
        log::debug!("rmprev: {}: removing whole frame", st.ev);

        let mut id = start;
        while id != self.pos {
            let cell = *t.cell(id);
            if cell.ev.map_or(false, |e| e.frame_key() == key) {
                t.cell_mut(cell.next).delta += cell.delta;
                if cell.next == self.pos {
                    self.delta += cell.delta;
                }
                t.remove(id);
            }
            id = cell.next;
        }
        self.statelist.rm(&key);
        None
    }

    /// Time signature in effect at the cursor, as (beats per measure, tics
    /// per beat).
    pub fn getsign(&self) -> (u32, u32) {
        match self.statelist.get(&FrameKey::TimeSig) {
            Some(State {
                ev: Ev::TimeSig { beats, tics },
                ..
            }) => (u32::from(*beats), u32::from(*tics)),
            _ => (DEFAULT_BPM, DEFAULT_TPB),
        }
    }

    /// Tempo in effect at the cursor, in microseconds per 24 tics.
    pub fn gettempo(&self) -> u32 {
        match self.statelist.get(&FrameKey::Tempo) {
            Some(State {
                ev: Ev::Tempo { usec24 },
                ..
            }) => *usec24,
            _ => DEFAULT_USEC24,
        }
    }

    /// Moves `meas` measures forward, reading the measure length from the
    /// time signature in effect. The cursor must sit on a measure boundary.
    /// Returns the tics short of the requested measure if the track ended
    /// first.
    pub fn skipmeasure(&mut self, t: &Track, meas: u32) -> u32 {
        for m in 0..meas {
            while self.evget(t).is_some() {}
            let (bpm, tpb) = self.getsign();
            let tics_per_meas = bpm * tpb;
            let remaining = self.skip(t, tics_per_meas);
            if remaining > 0 {
                return (meas - m - 1) * tics_per_meas + remaining;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::Chan;
    use crate::sequencer::state::StateFlags;

    fn chan() -> Chan {
        Chan::new(0, 0)
    }

    fn note_on(pitch: u8) -> Ev {
        Ev::NoteOn {
            chan: chan(),
            pitch,
            vel: 100,
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

    fn track_of(events: &[(u32, Ev)]) -> Track {
        let mut t = Track::new();
        let mut sp = SeqPtr::new(&t);
        let mut last = 0;
        for &(tic, ev) in events {
            sp.seek(&mut t, tic - last);
            sp.evput(&mut t, &ev);
            last = tic;
        }
        t
    }

    #[test]
    fn test_put_then_get_round_trip() {
        let t = track_of(&[(0, note_on(60)), (480, note_off(60))]);
        let events: Vec<_> = t.iter().collect();
        assert_eq!(events, vec![(0, note_on(60)), (480, note_off(60))]);
    }

    #[test]
    fn test_evget_walks_and_tracks_state() {
        let t = track_of(&[(0, note_on(60)), (480, note_off(60))]);
        let mut sp = SeqPtr::new(&t);

        let st = sp.evget(&t).expect("note-on");
        assert_eq!(st.ev, note_on(60));
        assert_eq!(st.phase, Phase::FIRST);
        assert!(sp.evget(&t).is_none());

        assert_eq!(sp.ticskip(&t, u32::MAX), 480);
        assert_eq!(sp.tic(), 480);

        let st = sp.evget(&t).expect("note-off");
        assert_eq!(st.phase, Phase::LAST);
        assert!(sp.eot(&t));
    }

    #[test]
    fn test_skip_returns_residual_at_eot() {
        let t = track_of(&[(10, cc(7, 100))]);
        let mut sp = SeqPtr::new(&t);
        assert_eq!(sp.skip(&t, 25), 15);
        assert!(sp.eot(&t));
    }

    #[test]
    fn test_seek_extends_the_track() {
        let mut t = Track::new();
        let mut sp = SeqPtr::new(&t);
        sp.seek(&mut t, 100);
        assert_eq!(sp.tic(), 100);
        assert_eq!(t.num_tics(), 100);
    }

    #[test]
    fn test_evdel_erases_without_advancing_time() {
        let mut t = track_of(&[(0, cc(7, 100)), (10, cc(7, 50))]);
        let mut sp = SeqPtr::new(&t);
        let mut erased = StateList::new();

        let st = sp.evdel(&mut t, Some(&mut erased)).expect("deleted");
        assert_eq!(st.ev, cc(7, 100));
        assert_eq!(sp.tic(), 0);
        assert!(sp.statelist().is_empty());

        let events: Vec<_> = t.iter().collect();
        assert_eq!(events, vec![(10, cc(7, 50))]);
    }

    #[test]
    fn test_ticdel_shrinks_ticput_grows() {
        let mut t = track_of(&[(100, cc(7, 1))]);
        let mut sp = SeqPtr::new(&t);
        assert_eq!(sp.ticdel(&mut t, 30, None), 30);
        assert_eq!(sp.tic(), 0);
        sp.ticput(&mut t, 10);
        assert_eq!(sp.tic(), 10);
        let events: Vec<_> = t.iter().collect();
        assert_eq!(events, vec![(80, cc(7, 1))]);
    }

    #[test]
    fn test_cancel_and_restore_controller() {
        let mut t = track_of(&[(0, cc(1, 99))]);
        let mut sp = SeqPtr::new(&t);
        sp.evget(&t);
        let st = *sp.statelist().lookup(&cc(1, 0)).unwrap();

        assert!(sp.cancel(&mut t, &st));
        assert!(sp.restore(&mut t, &st));
        let events: Vec<_> = t.iter().collect();
        assert_eq!(
            events,
            vec![(0, cc(1, 99)), (0, cc(1, 0)), (0, cc(1, 99))]
        );
    }

    #[test]
    fn test_cancel_refuses_notes() {
        let mut t = track_of(&[(0, note_on(60)), (480, note_off(60))]);
        let mut sp = SeqPtr::new(&t);
        sp.evget(&t);
        let st = *sp.statelist().lookup(&note_on(60)).unwrap();
        assert!(!sp.cancel(&mut t, &st));
        assert!(!sp.restore(&mut t, &st));
    }

    #[test]
    fn test_rmprev_erases_the_whole_frame() {
        let mut t = track_of(&[
            (0, note_on(60)),
            (10, cc(7, 50)),
            (20, note_off(60)),
            (30, cc(7, 60)),
        ]);
        let mut sp = SeqPtr::new(&t);
        // consume everything, then erase the note frame
        while !sp.eot(&t) {
            while sp.evget(&t).is_some() {}
            sp.ticskip(&t, u32::MAX);
        }
        // the note state is gone by now (terminated), use the controller
        let st = *sp.statelist().lookup(&cc(7, 0)).unwrap();
        assert!(sp.rmprev(&mut t, &st).is_none());
        let events: Vec<_> = t.iter().collect();
        assert_eq!(events, vec![(0, note_on(60)), (20, note_off(60))]);
        assert!(sp.statelist().lookup(&cc(7, 0)).is_none());
    }

    #[test]
    fn test_rmlast_keeps_earlier_frame_events() {
        let mut t = track_of(&[(0, cc(7, 50)), (30, cc(7, 60))]);
        let mut sp = SeqPtr::new(&t);
        while !sp.eot(&t) {
            while sp.evget(&t).is_some() {}
            sp.ticskip(&t, u32::MAX);
        }
        let st = *sp.statelist().lookup(&cc(7, 0)).unwrap();
        let st = sp.rmlast(&mut t, &st).expect("frame still alive");
        assert_eq!(st.ev, cc(7, 50));
        let events: Vec<_> = t.iter().collect();
        assert_eq!(events, vec![(0, cc(7, 50))]);
        assert_eq!(t.num_tics(), 30);
    }

    #[test]
    fn test_rmlast_drops_single_event_frame() {
        let mut t = track_of(&[(0, cc(7, 50))]);
        let mut sp = SeqPtr::new(&t);
        while sp.evget(&t).is_some() {}
        let st = *sp.statelist().lookup(&cc(7, 0)).unwrap();
        assert!(sp.rmlast(&mut t, &st).is_none());
        assert!(sp.statelist().lookup(&cc(7, 0)).is_none());
        assert_eq!(t.iter().count(), 0);
    }

    #[test]
    fn test_nested_note_state_is_flagged() {
        let t = track_of(&[(0, note_on(60)), (10, note_on(60)), (20, note_off(60))]);
        let mut sp = SeqPtr::new(&t);
        sp.evget(&t);
        sp.ticskip(&t, u32::MAX);
        let st = sp.evget(&t).expect("nested note-on");
        assert!(st.flags.contains(StateFlags::NESTED));
    }

    #[test]
    fn test_getsign_defaults() {
        let t = Track::new();
        let sp = SeqPtr::new(&t);
        assert_eq!(sp.getsign(), (DEFAULT_BPM, DEFAULT_TPB));
        assert_eq!(sp.gettempo(), DEFAULT_USEC24);
    }

    #[test]
    fn test_skipmeasure_reads_the_signature() {
        let t = track_of(&[(0, Ev::TimeSig { beats: 3, tics: 100 })]);
        let mut sp = SeqPtr::new(&t);
        // two measures of 3 * 100 tics, entirely past the end of track
        assert_eq!(sp.skipmeasure(&t, 2), 600 - t.num_tics());
    }
}
