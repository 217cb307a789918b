//! Label reachability: for every state, the set of labels that can appear as
//! the first non-epsilon label (on a chosen side) along some path from it.
//! After an interval-compressing relabeling, membership is a binary search
//! and a sorted arc range of a secondary FST can be sliced to its reachable
//! sub-range, optionally ⊕-accumulating the matched weights.

use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::{debug, error};

use crate::fst::{
    arc_sort, materialize, Arc, ExpandedFst, Fst, Label, MutableFst, StateId, VectorFst, EPSILON,
    NO_LABEL, NO_STATE,
};
use crate::interval_set::IntervalSet;
use crate::properties::{I_LABEL_SORTED, O_LABEL_SORTED};
use crate::semiring::Semiring;
use crate::state_reachable::StateReachable;

/// Accumulates weights of matched arc ranges during `reach_range`.
pub trait Accumulator<W: Semiring> {
    /// Called with the arc-iterator state before a sequence of sums.
    fn set_state(&mut self, _s: StateId) {}

    fn sum(&mut self, w: W, v: &W) -> W;

    /// Sums `arcs[begin..end)` onto `w`; overridable with precomputed
    /// partial sums.
    fn sum_range(&mut self, w: W, arcs: &[Arc<W>], begin: usize, end: usize) -> W {
        let mut acc = w;
        for arc in &arcs[begin..end] {
            acc = self.sum(acc, &arc.weight);
        }
        acc
    }

    fn error(&self) -> bool {
        false
    }
}

/// Plain ⊕ accumulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAccumulator;

impl<W: Semiring> Accumulator<W> for DefaultAccumulator {
    fn sum(&mut self, w: W, v: &W) -> W {
        w.plus(v)
    }
}

/// Shareable, immutable-after-construction reachability data; clones of a
/// `LabelReachable` hold the same `Rc`.
#[derive(Debug)]
pub struct LabelReachableData {
    reach_input: bool,
    final_label: Label,
    label2index: FxHashMap<Label, Label>,
    isets: Vec<IntervalSet>,
}

impl LabelReachableData {
    pub fn reach_input(&self) -> bool {
        self.reach_input
    }

    pub fn final_label(&self) -> Label {
        self.final_label
    }

    pub fn interval_set(&self, s: StateId) -> &IntervalSet {
        &self.isets[s as usize]
    }

    pub fn label2index(&self) -> &FxHashMap<Label, Label> {
        &self.label2index
    }
}

/// Tests reachability of labels from FST states.
///
/// Construction preprocesses a copy of the FST: every labeled arc is
/// redirected into a label-specific super-final state, original finality is
/// rerouted through a `NO_LABEL` super-final, and a super-initial state
/// covers zero-in-degree states. Final-state reachability then yields per-
/// state interval sets over a dense relabeling.
pub struct LabelReachable<W: Semiring, S = DefaultAccumulator> {
    data: Rc<LabelReachableData>,
    accumulator: S,
    s: StateId,
    reach_begin: Option<usize>,
    reach_end: usize,
    reach_weight: W,
    reach_fst_input: bool,
    error: bool,
    ncalls: u64,
    nintervals: u64,
}

impl<W: Semiring> LabelReachable<W, DefaultAccumulator> {
    pub fn new<F: Fst<W>>(fst: &F, reach_input: bool) -> Self {
        Self::with_accumulator(fst, reach_input, DefaultAccumulator)
    }
}

impl<W: Semiring, S: Accumulator<W>> LabelReachable<W, S> {
    pub fn with_accumulator<F: Fst<W>>(fst: &F, reach_input: bool, accumulator: S) -> Self {
        let mut working = materialize(fst);
        let ins = working.num_states();
        let label2state = transform_fst(&mut working, reach_input);
        let (data, error) = find_intervals(&working, ins, reach_input, label2state);
        LabelReachable {
            data: Rc::new(data),
            accumulator,
            s: NO_STATE,
            reach_begin: None,
            reach_end: 0,
            reach_weight: W::zero(),
            reach_fst_input: false,
            error,
            ncalls: 0,
            nintervals: 0,
        }
    }

    /// Shares preprocessed data with another instance.
    pub fn from_data(data: Rc<LabelReachableData>, accumulator: S) -> Self {
        LabelReachable {
            data,
            accumulator,
            s: NO_STATE,
            reach_begin: None,
            reach_end: 0,
            reach_weight: W::zero(),
            reach_fst_input: false,
            error: false,
            ncalls: 0,
            nintervals: 0,
        }
    }

    pub fn shared_data(&self) -> Rc<LabelReachableData> {
        Rc::clone(&self.data)
    }

    pub fn error(&self) -> bool {
        self.error || self.accumulator.error()
    }

    /// Dense index of `label`; labels unseen during preprocessing are
    /// unreachable everywhere and map to themselves past the dense range.
    pub fn relabel(&self, label: Label) -> Label {
        if label == EPSILON || self.error {
            return label;
        }
        match self.data.label2index.get(&label) {
            Some(&index) => index,
            None => label,
        }
    }

    /// Rewrites the chosen side of every arc to the dense labels and sorts
    /// arcs on that side, as required by `reach_range`.
    pub fn relabel_fst(&self, fst: &mut VectorFst<W>, relabel_input: bool) {
        for s in 0..fst.num_states() {
            fst.map_arcs(s, |arc| {
                if relabel_input {
                    arc.ilabel = self.relabel(arc.ilabel);
                } else {
                    arc.olabel = self.relabel(arc.olabel);
                }
            });
        }
        arc_sort(fst, relabel_input);
        if relabel_input {
            fst.set_input_symbols(None);
        } else {
            fst.set_output_symbols(None);
        }
    }

    /// Relabeling pairs `(old, new)`, excluding the internal final label.
    /// With `avoid_collisions`, dense labels not produced by the map are
    /// redirected past the dense range so unseen labels cannot collide.
    pub fn relabel_pairs(&self, avoid_collisions: bool) -> Vec<(Label, Label)> {
        let mut pairs = Vec::new();
        let label2index = &self.data.label2index;
        for (&label, &index) in label2index.iter() {
            if index != self.data.final_label {
                pairs.push((label, index));
            }
        }
        if avoid_collisions {
            for i in 1..=label2index.len() as Label {
                match label2index.get(&i) {
                    Some(&index) if index != self.data.final_label => {}
                    _ => pairs.push((i, label2index.len() as Label + 1)),
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    /// Sets the current state; `aiter_s` names the secondary-FST state whose
    /// arcs later `reach_range` calls will slice.
    pub fn set_state(&mut self, s: StateId, aiter_s: StateId) {
        self.s = s;
        if aiter_s != NO_STATE {
            self.accumulator.set_state(aiter_s);
            if self.accumulator.error() {
                self.error = true;
            }
        }
    }

    /// Can the (relabeled) `label` be reached from the current state?
    pub fn reach(&self, label: Label) -> bool {
        if label == EPSILON || self.error {
            return false;
        }
        self.data.interval_set(self.s).member(label)
    }

    /// Can a final state be reached via epsilons from the current state?
    pub fn reach_final(&self) -> bool {
        if self.error {
            return false;
        }
        self.data
            .interval_set(self.s)
            .member(self.data.final_label)
    }

    /// Verifies the secondary FST is sorted on the side `reach_range` will
    /// consult.
    pub fn reach_init<F: Fst<W>>(&mut self, fst: &F, reach_input: bool) {
        self.reach_fst_input = reach_input;
        let sorted_bit = if reach_input { I_LABEL_SORTED } else { O_LABEL_SORTED };
        if fst.properties(sorted_bit, true) == 0 {
            error!("label_reachable: secondary FST is not sorted on the reach side");
            self.error = true;
        }
    }

    /// Slices `arcs[begin..end)` (sorted on the reach side, relabeled) to
    /// the sub-range whose labels are reachable from the current state.
    /// Returns whether any arc matched; the range and the accumulated
    /// weight (when `compute_weight` is set) are readable afterwards.
    pub fn reach_range(
        &mut self,
        arcs: &[Arc<W>],
        begin: usize,
        end: usize,
        compute_weight: bool,
    ) -> bool {
        if self.error {
            return false;
        }
        let iset = self.data.interval_set(self.s);
        self.ncalls += 1;
        self.nintervals += iset.len() as u64;

        self.reach_begin = None;
        self.reach_end = 0;
        self.reach_weight = W::zero();

        if 2 * (end - begin) < iset.len() {
            // Few arcs: test each against the interval set.
            let mut reach_label = NO_LABEL;
            for (pos, arc) in arcs.iter().enumerate().take(end).skip(begin) {
                let label = if self.reach_fst_input {
                    arc.ilabel
                } else {
                    arc.olabel
                };
                if label == reach_label || self.reach(label) {
                    reach_label = label;
                    if self.reach_begin.is_none() {
                        self.reach_begin = Some(pos);
                    }
                    self.reach_end = pos + 1;
                    if compute_weight {
                        self.reach_weight =
                            self.accumulator.sum(self.reach_weight.clone(), &arc.weight);
                    }
                }
            }
        } else {
            // Few intervals: binary-search the sorted arcs per interval.
            let mut search_from = begin;
            for interval in iset {
                let range_begin = self.lower_bound(arcs, search_from, end, interval.begin);
                let range_end = self.lower_bound(arcs, range_begin, end, interval.end);
                search_from = range_end;
                if range_end > range_begin {
                    if self.reach_begin.is_none() {
                        self.reach_begin = Some(range_begin);
                    }
                    self.reach_end = range_end;
                    if compute_weight {
                        self.reach_weight = self.accumulator.sum_range(
                            self.reach_weight.clone(),
                            arcs,
                            range_begin,
                            range_end,
                        );
                    }
                }
            }
        }
        self.reach_begin.is_some()
    }

    /// Position of the first matching arc from the last `reach_range`.
    pub fn reach_begin(&self) -> Option<usize> {
        self.reach_begin
    }

    /// One past the last matching arc from the last `reach_range`.
    pub fn reach_end(&self) -> usize {
        self.reach_end
    }

    /// Accumulated weight from the last `reach_range` with `compute_weight`.
    pub fn reach_weight(&self) -> W {
        self.reach_weight.clone()
    }

    // First position in arcs[begin..end) whose reach-side label is >= the
    // probe, relying on the sorted-arc precondition.
    fn lower_bound(&self, arcs: &[Arc<W>], begin: usize, end: usize, probe: Label) -> usize {
        let mut low = begin;
        let mut high = end;
        while low < high {
            let mid = (low + high) / 2;
            let label = if self.reach_fst_input {
                arcs[mid].ilabel
            } else {
                arcs[mid].olabel
            };
            if label < probe {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }
}

impl<W: Semiring, S> Drop for LabelReachable<W, S> {
    fn drop(&mut self) {
        if self.ncalls > 0 {
            debug!(
                calls = self.ncalls,
                intervals_per_call = self.nintervals / self.ncalls,
                "label_reachable stats"
            );
        }
    }
}

// Redirects labeled arcs to per-label super-final states, reroutes original
// finality through a NO_LABEL super-final, and adds a super-initial state
// feeding every zero-in-degree state. Returns the label -> super-final map.
fn transform_fst<W: Semiring>(
    fst: &mut VectorFst<W>,
    reach_input: bool,
) -> FxHashMap<Label, StateId> {
    let ins = fst.num_states();
    let mut ons = ins;
    let mut label2state: FxHashMap<Label, StateId> = FxHashMap::default();
    let mut indeg: Vec<usize> = vec![0; ins as usize];

    for s in 0..ins {
        let arcs: Vec<Arc<W>> = fst.arcs(s).collect();
        fst.delete_arcs(s);
        for mut arc in arcs {
            let label = if reach_input { arc.ilabel } else { arc.olabel };
            if label != EPSILON {
                let target = *label2state.entry(label).or_insert_with(|| {
                    let t = ons;
                    ons += 1;
                    t
                });
                arc.nextstate = target;
            }
            if (arc.nextstate as usize) < indeg.len() {
                indeg[arc.nextstate as usize] += 1;
            }
            fst.add_arc(s, arc);
        }

        let final_weight = fst.final_weight(s);
        if !final_weight.is_zero() {
            let target = *label2state.entry(NO_LABEL).or_insert_with(|| {
                let t = ons;
                ons += 1;
                t
            });
            fst.add_arc(s, Arc::new(NO_LABEL, NO_LABEL, final_weight, target));
            fst.set_final(s, W::zero());
        }
    }

    // Materialize the super-final states.
    while fst.num_states() < ons {
        let s = fst.add_state();
        fst.set_final(s, W::one());
    }

    // Super-initial state over the zero-in-degree originals.
    let start = fst.add_state();
    fst.set_start(start);
    for s in 0..ins {
        if indeg[s as usize] == 0 {
            fst.add_arc(start, Arc::new(EPSILON, EPSILON, W::one(), s));
        }
    }
    label2state
}

fn find_intervals<W: Semiring>(
    fst: &VectorFst<W>,
    ins: StateId,
    reach_input: bool,
    label2state: FxHashMap<Label, StateId>,
) -> (LabelReachableData, bool) {
    let reachable = StateReachable::new(fst);
    let error = reachable.error;

    let mut isets = reachable.isets;
    isets.truncate(ins as usize);

    let mut label2index = FxHashMap::default();
    let mut final_label = NO_LABEL;
    for (label, state) in label2state {
        let index = reachable.state2index[state as usize];
        label2index.insert(label, index);
        if label == NO_LABEL {
            final_label = index;
        }
    }

    let data = LabelReachableData {
        reach_input,
        final_label,
        label2index,
        isets,
    };
    (data, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semiring::TropicalWeight;

    type W = TropicalWeight;

    fn w(v: f32) -> W {
        TropicalWeight(v)
    }

    /// The scenario FST: 0 --5--> 1, 0 --7--> 2, 1 --eps--> 3, 3 --9--> 4.
    fn scenario_fst() -> VectorFst<W> {
        let mut fst = VectorFst::new();
        for _ in 0..5 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.add_arc(0, Arc::new(5, 5, w(0.0), 1));
        fst.add_arc(0, Arc::new(7, 7, w(0.0), 2));
        fst.add_arc(1, Arc::new(0, 0, w(0.0), 3));
        fst.add_arc(3, Arc::new(9, 9, w(0.0), 4));
        fst.set_final(2, W::one());
        fst.set_final(4, W::one());
        fst
    }

    #[test]
    fn test_reach_scenario() {
        let mut reachable = LabelReachable::new(&scenario_fst(), true);
        assert!(!reachable.error());

        let l5 = reachable.relabel(5);
        let l7 = reachable.relabel(7);
        let l9 = reachable.relabel(9);

        reachable.set_state(0, NO_STATE);
        assert!(reachable.reach(l5));
        assert!(reachable.reach(l7));

        // Label 9 reaches through the epsilon at state 1.
        reachable.set_state(1, NO_STATE);
        assert!(reachable.reach(l9));
        assert!(!reachable.reach(l5));

        reachable.set_state(3, NO_STATE);
        assert!(reachable.reach(l9));
        assert!(!reachable.reach(l7));
    }

    #[test]
    fn test_reach_final_through_epsilon() {
        // 0 --eps--> 1(F): state 0 reaches finality without a label.
        let mut fst: VectorFst<W> = VectorFst::new();
        for _ in 0..2 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.add_arc(0, Arc::new(0, 0, w(0.0), 1));
        fst.set_final(1, W::one());

        let mut reachable = LabelReachable::new(&fst, true);
        reachable.set_state(0, NO_STATE);
        assert!(reachable.reach_final());
    }

    #[test]
    fn test_epsilon_never_reaches() {
        let mut reachable = LabelReachable::new(&scenario_fst(), true);
        reachable.set_state(0, NO_STATE);
        assert!(!reachable.reach(EPSILON));
    }

    #[test]
    fn test_relabel_is_dense_and_stable() {
        let reachable = LabelReachable::new(&scenario_fst(), true);
        let l5 = reachable.relabel(5);
        assert_eq!(reachable.relabel(5), l5);
        // Dense indices never collide with epsilon and stay distinct.
        let l7 = reachable.relabel(7);
        let l9 = reachable.relabel(9);
        for l in [l5, l7, l9] {
            assert_ne!(l, EPSILON);
            assert!(l <= 4);
        }
        assert!(l5 != l7 && l7 != l9 && l5 != l9);
        assert_eq!(reachable.relabel(EPSILON), EPSILON);
    }

    #[test]
    fn test_reach_range_on_relabeled_fst() {
        let mut reachable = LabelReachable::new(&scenario_fst(), true);

        // Secondary FST: one state with arcs labeled 5, 7, 9 (pre-relabel).
        let mut second: VectorFst<W> = VectorFst::new();
        let s = second.add_state();
        second.set_start(s);
        second.add_arc(s, Arc::new(5, 5, w(1.0), s));
        second.add_arc(s, Arc::new(7, 7, w(2.0), s));
        second.add_arc(s, Arc::new(9, 9, w(4.0), s));
        reachable.relabel_fst(&mut second, true);
        reachable.reach_init(&second, true);

        // From state 0, labels 5 and 7 (but not 9) are reachable.
        reachable.set_state(0, NO_STATE);
        let arcs: Vec<Arc<W>> = second.arcs(0).collect();
        assert!(reachable.reach_range(&arcs, 0, arcs.len(), true));
        let begin = reachable.reach_begin().unwrap();
        let end = reachable.reach_end();
        let matched: Vec<Label> = arcs[begin..end].iter().map(|a| a.ilabel).collect();
        assert_eq!(matched, vec![reachable.relabel(5), reachable.relabel(7)]);
        // min(1.0, 2.0) under tropical accumulation
        assert_eq!(reachable.reach_weight(), w(1.0));

        // From state 3 only label 9 matches.
        reachable.set_state(3, NO_STATE);
        assert!(reachable.reach_range(&arcs, 0, arcs.len(), true));
        assert_eq!(reachable.reach_weight(), w(4.0));
        assert_eq!(reachable.reach_end() - reachable.reach_begin().unwrap(), 1);
    }

    #[test]
    fn test_unsorted_secondary_sets_error() {
        let mut reachable = LabelReachable::new(&scenario_fst(), true);
        let mut second: VectorFst<W> = VectorFst::new();
        let s = second.add_state();
        second.set_start(s);
        second.add_arc(s, Arc::new(9, 9, w(0.0), s));
        second.add_arc(s, Arc::new(5, 5, w(0.0), s));
        reachable.reach_init(&second, true);
        assert!(reachable.error());
    }

    #[test]
    fn test_shared_data_clone() {
        let original = LabelReachable::new(&scenario_fst(), true);
        let l9 = original.relabel(9);
        let mut clone: LabelReachable<W> =
            LabelReachable::from_data(original.shared_data(), DefaultAccumulator);
        clone.set_state(3, NO_STATE);
        assert!(clone.reach(l9));
    }
}
