// Runs behind ForwardPass on the Backward worker, consuming frame ranges
// it hands off (SPEC_FULL.md §4.5). `FrameStore` is laid out with one
// extra terminal frame beyond the last real acoustic frame (see
// `engine`'s frame-count convention): that terminal frame's states are
// the FSAs' final positions, so `prune_time_range`'s `frames[end_t]`
// anchor is always a real, addressable frame -- never a frame past the
// end of the store, even for the call that prunes all the way to the
// utterance end.
use crate::frame_store::FrameStore;
use crate::graph::Graph;
use crate::ragged::{exclusive_sum, RaggedShape};
use crate::types::{ArcInfo, FrameInfo};
use fixedbitset::FixedBitSet;
use log::debug;
use smallvec::SmallVec;
use std::sync::Arc;

pub struct BackwardPruner {
    graph: Arc<Graph>,
    output_beam: f32,
}

impl BackwardPruner {
    pub fn new(graph: Arc<Graph>, output_beam: f32) -> Self {
        BackwardPruner { graph, output_beam }
    }

    /// Prune and compact frames `[begin_t, end_t)` in place, using
    /// `store.frame(end_t)` as the (already-populated) anchor whose
    /// states provide the backward boundary condition.
    pub fn prune_time_range(&self, store: &mut FrameStore, begin_t: usize, end_t: usize) {
        debug_assert!(end_t < store.len());
        debug_assert!(begin_t < end_t);
        debug!("backward: handoff received, pruning [{}, {})", begin_t, end_t);

        self.finalize_anchor(store, end_t);

        let mut remap: Option<Vec<i32>> = None;
        let mut t = end_t - 1;
        loop {
            self.score_frame(store, t, remap.as_deref());
            if t == begin_t {
                break;
            }
            remap = Some(self.compact_frame(store, t));
            t -= 1;
        }
        debug!("backward: handoff [{}, {}) done", begin_t, end_t);
    }

    /// `SetBackwardProbsFinal`: treat every state on the anchor frame as
    /// if it were the utterance's final position.
    fn finalize_anchor(&self, store: &FrameStore, end_t: usize) {
        let anchor = store.frame(end_t);
        for s in &anchor.states {
            let fwd = s.forward_loglike_f32();
            let bw = if fwd.is_finite() { -fwd } else { f32::NEG_INFINITY };
            unsafe { s.set_backward_loglike(bw) };
        }
    }

    /// Compute `backward_loglike` for every state on frame `t` and mark
    /// arcs that fail the output-beam test as pruned, translating each
    /// arc's destination index through `remap` (the next frame's
    /// old-to-new state map, or `None` when the next frame is the
    /// anchor and was left unrenumbered).
    fn score_frame(&self, store: &FrameStore, t: usize, remap: Option<&[i32]>) {
        let frames = store.frames();
        let cur = &frames[t];
        let next = &frames[t + 1];

        for global_state in 0..cur.states.len() {
            let mut best_back = f32::NEG_INFINITY;
            for arc_idx in cur.arc_shape.row_range(global_state) {
                let arc = &cur.arcs[arc_idx];
                if arc.is_pruned() {
                    continue;
                }
                let old_dest = arc.dest_state_idx1();
                let new_dest = match remap {
                    Some(r) => r[old_dest as usize],
                    None => old_dest,
                };
                if new_dest == -1 {
                    arc.set_dest_state_idx1(-1);
                    continue;
                }
                let arc_back = arc.arc_loglike + next.states[new_dest as usize].backward_loglike();
                let src_forward = cur.states[global_state].forward_loglike_f32();
                if arc_back + src_forward >= -self.output_beam {
                    arc.set_dest_state_idx1(new_dest);
                    if arc_back > best_back {
                        best_back = arc_back;
                    }
                } else {
                    arc.set_dest_state_idx1(-1);
                }
            }

            let mut backward = best_back;
            if best_back == f32::NEG_INFINITY {
                let fsa = cur.fsa_of_global_state(global_state);
                let state = &cur.states[global_state];
                let is_graph_final = self.graph.final_state_local(fsa as usize) == Some(state.a_state);
                if is_graph_final {
                    let fwd = state.forward_loglike_f32();
                    backward = if fwd.is_finite() { -fwd } else { f32::NEG_INFINITY };
                }
            }
            unsafe { cur.states[global_state].set_backward_loglike(backward) };
        }
    }

    /// Drop states that failed the backward keep-predicate, drop arcs
    /// marked pruned by `score_frame`, and return the old-to-new state
    /// index map for the frame below to remap its own arcs against.
    fn compact_frame(&self, store: &mut FrameStore, t: usize) -> Vec<i32> {
        let frame = store.frame(t);
        let mut keep_states = FixedBitSet::with_capacity(frame.states.len());
        for (idx, s) in frame.states.iter().enumerate() {
            keep_states.set(idx, s.is_kept_by_backward());
        }
        let mut keep_arcs = FixedBitSet::with_capacity(frame.arcs.len());
        for (idx, a) in frame.arcs.iter().enumerate() {
            keep_arcs.set(idx, !a.is_pruned());
        }

        let mut old_to_new = vec![-1i32; frame.states.len()];
        let mut new_states = Vec::new();
        let mut state_counts = vec![0i32; frame.state_shape.num_rows()];
        for row in 0..frame.state_shape.num_rows() {
            for idx in frame.state_shape.row_range(row) {
                if keep_states[idx] {
                    old_to_new[idx] = new_states.len() as i32;
                    new_states.push(frame.states[idx].clone());
                    state_counts[row] += 1;
                }
            }
        }
        let new_state_shape = RaggedShape::from_row_splits(exclusive_sum(&state_counts));

        let mut arc_rows: Vec<SmallVec<[ArcInfo; 4]>> = Vec::with_capacity(new_states.len());
        for idx in 0..frame.states.len() {
            if !keep_states[idx] {
                continue;
            }
            let mut row = SmallVec::new();
            for arc_idx in frame.arc_shape.row_range(idx) {
                if keep_arcs[arc_idx] {
                    row.push(frame.arcs[arc_idx].clone());
                }
            }
            arc_rows.push(row);
        }
        let arc_counts: Vec<i32> = arc_rows.iter().map(|r| r.len() as i32).collect();
        let new_arc_shape = RaggedShape::from_row_splits(exclusive_sum(&arc_counts));
        let new_arcs: Vec<ArcInfo> = arc_rows.into_iter().flatten().collect();

        *store.frame_mut(t) = FrameInfo {
            state_shape: new_state_shape,
            states: new_states,
            arc_shape: new_arc_shape,
            arcs: new_arcs,
        };

        old_to_new
    }
}
