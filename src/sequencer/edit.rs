// Track editors
// The high-level editing operations. They all share the same shape: walk
// the track with a cursor, erase events into an "original state" list and
// re-emit the reconstruction, so the track stays consistent whatever gets
// cut. State tags carry the per-frame decisions (keep, copy, silent).

use crate::midi::event::{Ev, Phase};
use crate::midi::spec::EvSpec;
use crate::sequencer::cursor::SeqPtr;
use crate::sequencer::state::{State, StateFlags, StateList};
use crate::sequencer::track::Track;

const TAG_KEEP: u32 = 1;
const TAG_COPY: u32 = 2;

/// Emits a low priority event unless it conflicts with a frame of the high
/// priority side. A frame starting in conflict is tagged silent and stays
/// silent until it ends.
fn evmerge1(pd: &mut SeqPtr, dst: &mut Track, orglist: &mut StateList, s1: &State, s2: Option<&State>) {
    if s1.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
        return;
    }
    let s2 = s2.filter(|s| !s.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED));

    let mut tag = s1.tag;
    if s1.phase.contains(Phase::FIRST) {
        let conflict = s2.map_or(false, |s| !s.phase.contains(Phase::LAST));
        tag = u32::from(!conflict);
        if let Some(org) = orglist.get_mut(&s1.key()) {
            org.tag = tag;
        }
        if tag == 0 {
            log::debug!("merge: {}: started in silent state", s1.ev);
        }
    }
    if tag != 0 {
        pd.evput(dst, &s1.ev);
    }
}

/// Emits a high priority event, discarding whatever the low priority side
/// had on the same frame. When the high priority frame ends, the low
/// priority frame is resumed at its current value.
fn evmerge2(
    pd: &mut SeqPtr,
    dst: &mut Track,
    orglist: &mut StateList,
    s1: Option<State>,
    src_list: &mut StateList,
    s2: &State,
) {
    if s2.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
        return;
    }
    let s1 = s1.filter(|s| !s.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED));

    let mut sd = pd.statelist().get(&s2.key()).copied();
    let mut tag = s2.tag;
    if s2.phase.contains(Phase::FIRST) {
        if let Some(s1) = s1 {
            if s1.tag != 0 {
                match sd {
                    None => {
                        if pd.debug() {
                            panic!("merge: {}: conflict without a state", s1.ev);
                        }
                        log::warn!("merge: {}: conflict without a state", s1.ev);
                    }
                    Some(sdv) => {
                        if s2.ev.is_note() {
                            // a note cannot be suspended, cut it out
                            if !s1.phase.contains(Phase::LAST) {
                                sd = pd.rmprev(dst, &sdv);
                            }
                        } else if s1.flags.contains(StateFlags::CHANGED) {
                            sd = pd.rmlast(dst, &sdv);
                        }
                    }
                }
                if let Some(org) = orglist.get_mut(&s1.key()) {
                    org.tag = 0;
                }
            }
        }
        tag = 1;
    } else if s2.phase.contains(Phase::NEXT) {
        // conflicts were resolved when the frame started
    } else if s2.phase.contains(Phase::LAST) {
        if let Some(s1) = s1 {
            tag = 0;
            // resume the low priority frame at its current value
            if sd.as_ref().map_or(true, |sdv| !sdv.eq_ev(&s1.ev)) {
                sd = Some(pd.evput(dst, &s1.ev));
            }
            if let Some(org) = orglist.get_mut(&s1.key()) {
                org.tag = 1;
            }
        }
    }
    if let Some(src_st) = src_list.get_mut(&s2.key()) {
        src_st.tag = tag;
    }
    if tag != 0 && sd.as_ref().map_or(true, |sdv| !sdv.eq_ev(&s2.ev)) {
        pd.evput(dst, &s2.ev);
    }
}

impl Track {
    /// Merges `src` (high priority) into `self` (low priority), resolving
    /// every conflict so the result stays consistent. Where both tracks
    /// have a frame active on the same identity, `src` wins; the losing
    /// frame is suspended for the overlap and resumed when the winner ends.
    pub fn merge(&mut self, src: &Track) {
        let mut pd = SeqPtr::new(self);
        let mut p2 = SeqPtr::new(src);
        let mut orglist = StateList::new();

        loop {
            // rewrite the current tic of the destination, checking each
            // event against the source state; orglist keeps the exact
            // state of the original destination track
            while let Some(s1) = pd.evdel(self, Some(&mut orglist)) {
                let s2 = p2.statelist().get(&s1.key()).copied();
                evmerge1(&mut pd, self, &mut orglist, &s1, s2.as_ref());
            }

            // then append the source events of the same tic
            while let Some(s2) = p2.evget(src) {
                let s1 = orglist.get(&s2.key()).copied();
                evmerge2(&mut pd, self, &mut orglist, s1, p2.statelist_mut(), &s2);
            }

            // advance to the closest next event on either side
            let delta1 = pd.tics_avail(self);
            let delta2 = p2.tics_avail(src);
            let delta = if delta1 > 0 {
                if delta2 > 0 {
                    delta1.min(delta2)
                } else {
                    delta1
                }
            } else if delta2 > 0 {
                delta2
            } else {
                break;
            };
            p2.ticskip(src, delta);
            pd.ticdel(self, delta, Some(&mut orglist));
            pd.ticput(self, delta);
        }
        self.chomp();
    }

    /// Copies and/or cuts the `spec`-matching frames of `[start,
    /// start+len)`. With `dst` given, the selection lands there relative to
    /// `start`; with `blank` set it is cleanly removed from `self`. Notes
    /// are moved whole; other frames are cut by writing cancel events at
    /// the boundaries and restore events where the original continues.
    pub fn move_range(
        &mut self,
        start: u32,
        len: u32,
        spec: &EvSpec,
        mut dst: Option<&mut Track>,
        blank: bool,
    ) {
        if len == 0 {
            return;
        }
        let mut dp = match dst {
            Some(ref mut d) => {
                d.clear();
                Some(SeqPtr::new(d))
            }
            None => None,
        };
        let mut sp = SeqPtr::new(self);

        // go to the start position; every frame live there is kept in the
        // source by default
        sp.skip(self, start);
        let mut slist = sp.statelist().dup();
        for st in slist.iter_mut() {
            st.tag = TAG_KEEP;
        }

        // suspend the selected frames that are about to be erased
        if blank {
            let snaps: Vec<State> = slist.iter().copied().collect();
            for st in snaps {
                if spec.matches(&st.ev) && sp.cancel(self, &st) {
                    if let Some(s) = slist.get_mut(&st.key()) {
                        s.tag &= !TAG_KEEP;
                    }
                }
            }
        }

        // first tic of the region: new frames decide here whether they are
        // copied or kept, and frames ending exactly at `start` terminate
        // before the copy restores anything
        while sp.evavail(self) {
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag = if spec.matches(&st.ev) { TAG_COPY } else { TAG_KEEP };
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag & TAG_COPY != 0 {
                if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                    p.evput(d, &st.ev);
                }
            }
            if !blank || st.tag & TAG_KEEP != 0 {
                sp.evput(self, &st.ev);
            }
        }

        // in the copy, restore the selected frames the first tic did not
        // update, so the copy starts from the right values
        if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
            let snaps: Vec<State> = slist.iter().copied().collect();
            for st in snaps {
                if !spec.matches(&st.ev) || st.tag & TAG_COPY != 0 {
                    continue;
                }
                if p.restore(d, &st) {
                    if let Some(s) = slist.get_mut(&st.key()) {
                        s.tag |= TAG_COPY;
                    }
                }
            }
        }

        // tag, copy and erase frames during `len` tics
        let mut remaining = len;
        loop {
            let delta = sp.ticdel(self, remaining, Some(&mut slist));
            if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                p.ticput(d, delta);
            }
            sp.ticput(self, delta);
            remaining -= delta;
            if remaining == 0 {
                break;
            }
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag = if spec.matches(&st.ev) { TAG_COPY } else { TAG_KEEP };
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag & TAG_COPY != 0 {
                if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                    p.evput(d, &st.ev);
                }
            }
            if !blank || st.tag & TAG_KEEP != 0 {
                sp.evput(self, &st.ev);
            }
        }

        // make the copy self-contained: suspend every frame still being
        // copied, so playing it alone sounds like the excerpt
        if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
            let snaps: Vec<State> = slist.iter().copied().collect();
            for st in snaps {
                if st.tag & TAG_COPY != 0 && p.cancel(d, &st) {
                    if let Some(s) = slist.get_mut(&st.key()) {
                        s.tag &= !TAG_COPY;
                    }
                }
            }
        }

        // first tic after the region: frames starting here are kept; this
        // is the last chance for erased frames to terminate by themselves
        // instead of being restored
        while sp.evavail(self) {
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag |= TAG_KEEP;
                st.tag &= !TAG_COPY;
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag & TAG_COPY != 0 {
                if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                    p.evput(d, &st.ev);
                }
            }
            if !blank || st.tag & TAG_KEEP != 0 {
                sp.evput(self, &st.ev);
            }
        }

        // restore in the source every erased frame that did not come back
        // by itself
        let snaps: Vec<State> = slist.iter().copied().collect();
        for st in snaps {
            if st.tag & TAG_KEEP == 0 && sp.restore(self, &st) {
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag |= TAG_KEEP;
                }
            }
        }

        // finish copying the frames that could not be suspended (notes
        // crossing the end boundary)
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                p.ticput(d, delta);
            }
            sp.ticput(self, delta);
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag &= !TAG_COPY;
                st.tag |= TAG_KEEP;
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag & TAG_COPY != 0 {
                if let (Some(d), Some(p)) = (dst.as_deref_mut(), dp.as_mut()) {
                    p.evput(d, &st.ev);
                }
            }
            if !blank || st.tag & TAG_KEEP != 0 {
                sp.evput(self, &st.ev);
            }
        }

        if let Some(d) = dst.as_deref_mut() {
            d.chomp();
        }
        if blank {
            self.chomp();
        }
    }

    /// Moves note starts within `[start, start+len)` onto the grid defined
    /// by `quant` and `offset`. `rate` is the snap strength in percent:
    /// 0 leaves positions unchanged, 100 snaps fully. Only notes move;
    /// everything else keeps its position.
    pub fn quantize(&mut self, start: u32, len: u32, offset: u32, quant: u32, rate: u32) {
        assert!(rate <= 100, "rate is a percentage");
        let mut qt = Track::new();
        let mut sp = SeqPtr::new(self);
        let mut qp = SeqPtr::new(&qt);

        // go to the start position; frames live there are not quantized
        sp.skip(self, start);
        let mut slist = sp.statelist().dup();
        for st in slist.iter_mut() {
            st.tag = 0;
        }
        qp.seek(&mut qt, start);

        let mut tic = start;
        let mut ofs: i64 = 0;
        let mut fluct: u64 = 0;
        let mut notes: u64 = 0;

        // walk the region, routing note frames into the scratch track
        // with the time scale stretched event by event
        loop {
            let delta = sp.ticdel(self, start + len - tic, Some(&mut slist));
            tic += delta;
            sp.ticput(self, delta);
            if tic >= start + len || !sp.evavail(self) {
                break;
            }

            let mut qdelta = i64::from(delta) - ofs;
            let quant_rem = if quant != 0 {
                (tic - start + offset) % quant
            } else {
                0
            };
            ofs = if quant_rem < quant / 2 {
                -((i64::from(quant_rem) * i64::from(rate) + 99) / 100)
            } else {
                (i64::from(quant - quant_rem) * i64::from(rate) + 99) / 100
            };
            if qdelta + ofs < 0 {
                // would move this event before the previous one
                if sp.debug() {
                    panic!("quantize: offset underflow at tic {tic}");
                }
                log::warn!("quantize: offset underflow at tic {tic}, clamped");
                ofs = -qdelta;
            }
            qdelta += ofs;
            qp.ticput(&mut qt, qdelta as u32);

            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                if st.ev.is_note() {
                    st.tag = 1;
                    fluct += ofs.unsigned_abs();
                    notes += 1;
                } else {
                    st.tag = 0;
                }
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag != 0 {
                qp.evput(&mut qt, &st.ev);
            } else {
                sp.evput(self, &st.ev);
            }
        }

        // finish the quantized frames at their original positions
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            if !sp.evavail(self) {
                break;
            }
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag = 0;
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = 0;
                }
            }
            qp.ticput(&mut qt, delta);
            if st.tag != 0 {
                qp.evput(&mut qt, &st.ev);
            } else {
                sp.evput(self, &st.ev);
            }
        }

        self.merge(&qt);
        if notes > 0 {
            log::debug!(
                "quantize: moved {notes} notes by {}% of a tic on average",
                100 * fluct / notes
            );
        }
    }

    /// Shifts the pitch of every note starting within `[start, start+len)`
    /// by `halftones`, wrapping within the 7-bit range.
    pub fn transpose(&mut self, start: u32, len: u32, halftones: i32) {
        let mut qt = Track::new();
        let mut sp = SeqPtr::new(self);
        let mut qp = SeqPtr::new(&qt);

        // go to the start position; frames live there are not transposed
        sp.skip(self, start);
        let mut slist = sp.statelist().dup();
        for st in slist.iter_mut() {
            st.tag = 0;
        }
        qp.seek(&mut qt, start);

        let mut tic = start;
        loop {
            let delta = sp.ticdel(self, start + len - tic, Some(&mut slist));
            sp.ticput(self, delta);
            qp.ticput(&mut qt, delta);
            tic += delta;
            if tic >= start + len || !sp.evavail(self) {
                break;
            }
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag = u32::from(st.ev.is_note());
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = st.tag;
                }
            }
            if st.tag != 0 {
                qp.evput(&mut qt, &st.ev.transposed(halftones));
            } else {
                sp.evput(self, &st.ev);
            }
        }

        // finish the transposed frames
        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            qp.ticput(&mut qt, delta);
            if !sp.evavail(self) {
                break;
            }
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.phase.contains(Phase::FIRST) {
                st.tag = 0;
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = 0;
                }
            }
            if st.tag != 0 {
                qp.evput(&mut qt, &st.ev.transposed(halftones));
            } else {
                sp.evput(self, &st.ev);
            }
        }

        self.merge(&qt);
    }

    /// Checks the track and repairs inconsistencies: out-of-order and
    /// nested events are dropped, value-equal duplicates are dropped, and
    /// frames left open at the end of the track are erased.
    pub fn check(&mut self) {
        let mut sp = SeqPtr::new(self);
        let mut slist = StateList::new();

        loop {
            let delta = sp.ticdel(self, u32::MAX, Some(&mut slist));
            sp.ticput(self, delta);
            let Some(mut st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if st.flags.intersects(StateFlags::BOGUS | StateFlags::NESTED) {
                log::warn!(
                    "check: {}: {} event discarded",
                    st.ev,
                    if st.flags.contains(StateFlags::BOGUS) {
                        "out of order"
                    } else {
                        "nested"
                    }
                );
                continue;
            }
            if st.flags.contains(StateFlags::NEW) {
                st.tag = 1;
                if let Some(s) = slist.get_mut(&st.key()) {
                    s.tag = 1;
                }
            }
            if st.tag != 0 {
                // do not duplicate events
                let dup = sp
                    .statelist()
                    .get(&st.key())
                    .map_or(false, |d| d.eq_ev(&st.ev));
                if dup {
                    log::warn!("check: {}: duplicate event discarded", st.ev);
                } else {
                    sp.evput(self, &st.ev);
                }
            }
        }

        // erase the frames left open at the end of the track
        let open: Vec<State> = sp
            .statelist()
            .iter()
            .filter(|s| !s.phase.contains(Phase::LAST))
            .copied()
            .collect();
        for st in open {
            log::warn!("check: {}: unterminated frame removed", st.ev);
            sp.rmprev(self, &st);
        }

        // the inconsistencies are fixed in the track; silence the
        // unterminated-frame warning the erased list would emit
        slist.clear();
    }

    /// Replaces the event of `ev`'s frame in a config track, preserving the
    /// relative update order of all other frames. A config track holds only
    /// one-shot events at tic zero, describing persistent setup.
    pub fn confev(&mut self, ev: &Ev) {
        let mut sp = SeqPtr::new(self);
        if ev.phase() != Phase::FIRST_LAST {
            if sp.debug() {
                panic!("confev: {ev}: not a one-shot event");
            }
            log::warn!("confev: {ev}: not a one-shot event, ignored");
            return;
        }
        let mut slist = StateList::new();

        // tear the track down into a state list; serial tags keep the
        // order in which the frames were last updated
        let mut serial: u32 = 0;
        loop {
            sp.ticdel(self, u32::MAX, Some(&mut slist));
            let Some(st) = sp.evdel(self, Some(&mut slist)) else {
                break;
            };
            if let Some(s) = slist.get_mut(&st.key()) {
                s.tag = serial;
            }
            serial += 1;
        }

        // the new event becomes the most recent update of its frame
        let st = slist.update(ev);
        st.tag = serial;

        // replay the frames oldest first, skipping values already set
        let mut snaps: Vec<State> = slist.iter().copied().collect();
        snaps.sort_by_key(|s| s.tag);
        for st in snaps {
            for rev in st.restore_events() {
                let dup = sp
                    .statelist()
                    .get(&rev.frame_key())
                    .map_or(false, |d| d.eq_ev(&rev));
                if !dup {
                    sp.evput(self, &rev);
                }
            }
        }
    }
}
