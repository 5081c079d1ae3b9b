// Expands every active state on a frame into its outgoing graph arcs,
// computing each arc's acoustic-weighted end log-like (SPEC_FULL.md §4.2).
// The allow-partial final-frame rewrite lives here too, since it only
// changes what gets expanded, not how the arcs are scored afterward.
use crate::graph::{DenseScores, Graph};
use crate::ragged::RaggedShape;
use crate::types::{ArcInfo, FrameInfo, StateInfo};
use smallvec::SmallVec;

/// Most decoding-graph states have only a handful of outgoing arcs; this
/// keeps a state's expanded arc list off the heap in the common case.
type ArcList = SmallVec<[ArcInfo; 4]>;

/// Build `cur.arcs` for frame `t`, given `cur.states` already populated.
///
/// `fsa_of_logical` maps a global state's row (as reported by `cur`'s own
/// `state_shape`, which is always indexed 0..num_seqs) to the logical fsa
/// index used to look up `graph`/`scores` (identity in batch mode; the
/// caller's own sequence numbering in online mode, where it's also
/// identity, so this exists mainly for a future caller that renumbers).
pub fn expand_frame(
    cur_state_shape: &RaggedShape,
    cur_states: &[StateInfo],
    graph: &Graph,
    scores: &DenseScores,
    t: usize,
    final_t: &[usize],
    allow_partial: bool,
) -> (RaggedShape, Vec<ArcInfo>) {
    let num_fsas = cur_state_shape.num_rows();
    let mut arc_counts = vec![0i32; cur_states.len()];
    let mut per_state_arcs: Vec<ArcList> = Vec::with_capacity(cur_states.len());

    for fsa in 0..num_fsas {
        let is_final_frame = t + 1 == final_t[fsa];
        for global_state in cur_state_shape.row_range(fsa) {
            let state = &cur_states[global_state];
            let graph_state = graph.global_state(fsa, state.a_state);
            let arcs = graph.arcs_of_global_state(graph_state);
            let arc_offset = graph.arc_offset(graph_state);

            let has_real_final_arc = is_final_frame && arcs.iter().any(|a| a.label == -1);
            let rewrite_to_partial = is_final_frame && allow_partial && !has_real_final_arc && !arcs.is_empty();

            let src_forward = state.forward_loglike_f32();
            let mut expanded: ArcList = SmallVec::with_capacity(arcs.len());
            for (local_idx, arc) in arcs.iter().enumerate() {
                let (dest, acoustic) = if rewrite_to_partial {
                    let final_local = graph.final_state_local(fsa).unwrap_or(arc.dest_state);
                    (graph.global_state(fsa, final_local), 0.0)
                } else {
                    (graph.global_state(fsa, arc.dest_state), scores.acoustic(fsa, t, arc.label))
                };
                let arc_loglike = arc.score + acoustic;
                let end_loglike = src_forward + arc_loglike;
                expanded.push(ArcInfo::new(arc_offset + local_idx as i32, arc_loglike, end_loglike, dest));
            }
            arc_counts[global_state] = expanded.len() as i32;
            per_state_arcs.push(expanded);
        }
    }

    let arc_shape = RaggedShape::from_row_splits(crate::ragged::exclusive_sum(&arc_counts));
    let arcs = per_state_arcs.into_iter().flatten().collect();
    (arc_shape, arcs)
}

/// Best (max) `end_loglike` and active-state count per fsa on this frame,
/// the two inputs `BeamController::update` needs each frame.
pub fn best_and_active(
    cur_state_shape: &RaggedShape,
    arc_shape: &RaggedShape,
    arcs: &[ArcInfo],
) -> (Vec<f32>, Vec<i32>) {
    let num_fsas = cur_state_shape.num_rows();
    let mut best = vec![f32::NEG_INFINITY; num_fsas];
    let mut active = vec![0i32; num_fsas];
    for fsa in 0..num_fsas {
        let states = cur_state_shape.row_range(fsa);
        active[fsa] = states.len() as i32;
        for global_state in states {
            for arc in &arcs[arc_shape.row_range(global_state)] {
                if arc.end_loglike > best[fsa] {
                    best[fsa] = arc.end_loglike;
                }
            }
        }
    }
    (best, active)
}

/// Used by FrameInfo's own `arc_shape`/`arcs`, replicated here because the
/// state shape passed in for expansion does not have to be the same
/// allocation as the one eventually stored on `FrameInfo`.
pub fn finish_frame(state_shape: RaggedShape, states: Vec<StateInfo>, arc_shape: RaggedShape, arcs: Vec<ArcInfo>) -> FrameInfo {
    FrameInfo { state_shape, states, arc_shape, arcs }
}
