// The per-frame forward token-passing cycle (SPEC_FULL.md §4.4): expand,
// cut off by beam, deduplicate destinations through StateHash, allocate
// the next frame's states, and atomically max-reduce forward log-likes
// into them.
use crate::arc_expander::{best_and_active, expand_frame};
use crate::beam::BeamController;
use crate::error::Result;
use crate::frame_store::FrameStore;
use crate::graph::{DenseScores, Graph};
use crate::ragged::{exclusive_sum, RaggedShape};
use crate::state_hash::{pack_key, StateHash};
use crate::types::{FrameInfo, StateInfo};
use log::{debug, trace, warn};
use std::sync::Arc;

pub struct ForwardPass {
    graph: Arc<Graph>,
    scores: Arc<DenseScores>,
    final_t: Vec<usize>,
    allow_partial: bool,
    online: bool,
    max_states_per_fsa: u32,
    hash: StateHash,
    pub beam: BeamController,
}

impl ForwardPass {
    pub fn new(
        graph: Arc<Graph>,
        scores: Arc<DenseScores>,
        final_t: Vec<usize>,
        allow_partial: bool,
        online: bool,
        beam: BeamController,
    ) -> Result<Self> {
        let num_fsas = scores.num_fsas();
        let max_states_per_fsa = (0..num_fsas).map(|f| graph.num_states(f)).max().unwrap_or(0) as u32;
        let max_key = (num_fsas as u64) * (max_states_per_fsa as u64) + 1;
        let hash = StateHash::new(max_key, 128)?;
        Ok(ForwardPass {
            graph,
            scores,
            final_t,
            allow_partial,
            online,
            max_states_per_fsa,
            hash,
            beam,
        })
    }

    /// Process frame `t`: fills in `store.frame(t)`'s arcs and pushes the
    /// populated next-frame `FrameInfo` (states only; its own arcs are
    /// filled by the following call). `store.frame(t)` must already exist
    /// with `states` populated and empty `arcs`.
    pub fn step(&mut self, store: &mut FrameStore, t: usize) {
        debug!("forward: frame {} begin, {} states", t, store.frame(t).states.len());
        let (arc_shape, arcs, next_frame) = {
            let cur = store.frame(t);
            let (arc_shape, arcs) = expand_frame(
                &cur.state_shape,
                &cur.states,
                &self.graph,
                &self.scores,
                t,
                &self.final_t,
                self.allow_partial,
            );
            let (best, active) = best_and_active(&cur.state_shape, &arc_shape, &arcs);
            let num_fsas = cur.state_shape.num_rows();

            let mut cutoffs = vec![f32::NEG_INFINITY; num_fsas];
            for fsa in 0..num_fsas {
                let prev_beam = self.beam.beam(fsa);
                cutoffs[fsa] = self.beam.update(fsa, best[fsa], active[fsa], t, self.final_t[fsa], self.online);
                trace!(
                    "forward: fsa {} frame {} beam {} -> {} (active {}, best {})",
                    fsa, t, prev_beam, self.beam.beam(fsa), active[fsa], best[fsa]
                );
            }

            let new_capacity = arcs.len().max(128);
            if new_capacity > self.hash.capacity() {
                debug!("forward: resizing state hash {} -> {}", self.hash.capacity(), new_capacity);
            }
            self.hash.resize_empty(new_capacity);

            let owning_fsa = |arc_idx: usize| -> usize {
                let owning_state = arc_shape.row_of(arc_idx) as usize;
                cur.fsa_of_global_state(owning_state) as usize
            };
            let key_for = |fsa: usize, dest_graph_state: i32| -> u64 {
                let dest_local = self.graph.local_state(fsa, dest_graph_state) as u32;
                pack_key(fsa as u32, dest_local, self.max_states_per_fsa)
            };

            let mut kept_arc_indices = Vec::new();
            let mut state_counts = vec![0i32; num_fsas];
            for (idx, arc) in arcs.iter().enumerate() {
                let fsa = owning_fsa(idx);
                if arc.end_loglike > cutoffs[fsa] {
                    let key = key_for(fsa, arc.dest_graph_state);
                    if self.hash.insert(key, idx as u64) {
                        kept_arc_indices.push(idx);
                        state_counts[fsa] += 1;
                    }
                }
            }

            let next_state_shape = RaggedShape::from_row_splits(exclusive_sum(&state_counts));
            let mut next_states = Vec::with_capacity(kept_arc_indices.len());
            for &arc_idx in &kept_arc_indices {
                let arc = &arcs[arc_idx];
                let fsa = owning_fsa(arc_idx);
                let dest_local = self.graph.local_state(fsa, arc.dest_graph_state);
                next_states.push(StateInfo::new(dest_local));
            }

            for (new_idx, &arc_idx) in kept_arc_indices.iter().enumerate() {
                let arc = &arcs[arc_idx];
                let fsa = owning_fsa(arc_idx);
                let key = key_for(fsa, arc.dest_graph_state);
                self.hash.set_value_at(key, new_idx as u64);
            }

            for (idx, arc) in arcs.iter().enumerate() {
                let fsa = owning_fsa(idx);
                if arc.end_loglike <= cutoffs[fsa] {
                    arc.set_dest_state_idx1(-1);
                    continue;
                }
                let key = key_for(fsa, arc.dest_graph_state);
                match self.hash.find(key) {
                    Some(new_idx) => {
                        arc.set_dest_state_idx1(new_idx as i32);
                        next_states[new_idx as usize].update_forward_max(arc.end_loglike);
                    }
                    None => arc.set_dest_state_idx1(-1),
                }
            }

            for &arc_idx in &kept_arc_indices {
                let arc = &arcs[arc_idx];
                let fsa = owning_fsa(arc_idx);
                let key = key_for(fsa, arc.dest_graph_state);
                self.hash.delete(key);
            }

            #[cfg(debug_assertions)]
            if !self.hash.is_empty() {
                warn!("forward: state hash not empty after frame {} propagation", t);
                debug_assert!(false, "StateHash must be empty outside a frame's propagation step");
            }

            let next_frame = FrameInfo {
                state_shape: next_state_shape,
                arc_shape: RaggedShape::empty(next_states.len()),
                states: next_states,
                arcs: Vec::new(),
            };
            (arc_shape, arcs, next_frame)
        };

        debug!("forward: frame {} end, {} states kept for frame {}", t, next_frame.states.len(), t + 1);
        store.frame_mut(t).arc_shape = arc_shape;
        store.frame_mut(t).arcs = arcs;
        store.push(next_frame);
    }

}
