//! Final-state reachability with interval numbering.
//!
//! Runs over the transformed FST built by label reachability, where every
//! labeled arc has been redirected into a label-specific super-final state.
//! Each final state receives a dense index at DFS discovery; every state's
//! reachable index set is the union of its children's, stored as intervals.

use tracing::warn;

use crate::fst::{ExpandedFst, Fst, Label, StateId, VectorFst, NO_STATE};
use crate::interval_set::IntervalSet;
use crate::semiring::Semiring;

pub struct StateReachable {
    /// Interval set of reachable final-state indices, per state.
    pub isets: Vec<IntervalSet>,
    /// Dense index of each final state, `NO_LABEL`-free: `NO_STATE` slot
    /// values mean "not a final state".
    pub state2index: Vec<Label>,
    /// Set when the graph has a cycle; interval numbering is then
    /// ill-defined.
    pub error: bool,
}

impl StateReachable {
    pub fn new<W: Semiring>(fst: &VectorFst<W>) -> Self {
        let n = fst.num_states() as usize;
        let mut reachable = StateReachable {
            isets: vec![IntervalSet::new(); n],
            state2index: vec![NO_STATE; n],
            error: false,
        };
        let start = fst.start();
        if start == NO_STATE || n == 0 {
            return reachable;
        }

        // Three-color DFS; a final state's index is assigned at discovery,
        // so sibling subtrees cover contiguous index ranges where the graph
        // is tree-like. Indices start at 1: label reachability reuses them
        // as dense labels and 0 must stay epsilon.
        let mut color = vec![0u8; n];
        let mut next_index: Label = 1;
        let mut stack: Vec<(StateId, usize)> = vec![(start, 0)];
        color[start as usize] = 1;
        reachable.discover(fst, start, &mut next_index);

        loop {
            let (s, pos) = match stack.last_mut() {
                None => break,
                Some((s, pos)) => {
                    let cur = *pos;
                    *pos += 1;
                    (*s, cur)
                }
            };
            let arcs = fst.arcs_slice(s);
            if pos >= arcs.len() {
                stack.pop();
                color[s as usize] = 2;
                reachable.isets[s as usize].normalize();
                if let Some(&(parent, _)) = stack.last() {
                    let child_set = reachable.isets[s as usize].clone();
                    reachable.isets[parent as usize].extend_from(&child_set);
                }
                continue;
            }
            let t = arcs[pos].nextstate;
            match color[t as usize] {
                0 => {
                    color[t as usize] = 1;
                    reachable.discover(fst, t, &mut next_index);
                    stack.push((t, 0));
                }
                1 => {
                    warn!("state_reachable: cycle in the transformed graph");
                    reachable.error = true;
                }
                _ => {
                    // Cross or forward arc: the target's set is complete.
                    let child_set = reachable.isets[t as usize].clone();
                    reachable.isets[s as usize].extend_from(&child_set);
                }
            }
        }
        reachable
    }

    fn discover<W: Semiring>(
        &mut self,
        fst: &VectorFst<W>,
        s: StateId,
        next_index: &mut Label,
    ) {
        if !fst.final_weight(s).is_zero() {
            self.state2index[s as usize] = *next_index;
            self.isets[s as usize].insert_point(*next_index);
            *next_index += 1;
        }
    }
}
