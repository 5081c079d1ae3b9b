// Chunked decoding (SPEC_FULL.md §4.8, §6 "Online intersecter"). Each of
// the `num_seqs` sequences runs its own independent {ForwardPass,
// BackwardPruner, BeamController} pipeline against the one shared graph
// (`a_fsas.outer_size == 1` is required up front): nothing in those
// components' design requires a joint multi-fsa batch, so collapsing to
// per-sequence pipelines trades away some throughput for chunk-boundary
// bookkeeping simple enough to get right. See DESIGN.md for the rest of
// this module's Open Question resolutions (chunk framing, beam carry,
// partial-lattice synthesis).
use crate::assembler::{assemble, AssembleOutput, Lattice, LatticeArc};
use crate::backward::BackwardPruner;
use crate::beam::BeamController;
use crate::error::{IntersectError, Result};
use crate::forward::ForwardPass;
use crate::frame_store::FrameStore;
use crate::graph::{DenseScores, Graph};
use crate::ragged::{exclusive_sum, RaggedShape};
use crate::types::{FrameInfo, StateInfo};
use std::sync::Arc;

/// Per-sequence carry between `OnlineIntersector::decode` calls: the
/// accumulated (and partially pruned) frame history, the current dynamic
/// beam, and the utterance's true final frame index once reached.
pub struct DecodeState {
    frames: FrameStore,
    beam: Option<f32>,
    true_final_t: Option<usize>,
}

impl DecodeState {
    /// A fresh state: one state on frame 0 (the graph start), no beam
    /// carried yet (seeded from `search_beam` on first `decode` call).
    pub fn new() -> Self {
        let start = StateInfo::new(0);
        start.update_forward_max(0.0);
        let mut frames = FrameStore::with_capacity(1);
        frames.push(FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![start],
            arc_shape: RaggedShape::empty(1),
            arcs: Vec::new(),
        });
        DecodeState { frames, beam: None, true_final_t: None }
    }

    pub fn is_finished(&self) -> bool {
        self.true_final_t.is_some()
    }
}

impl Default for DecodeState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OnlineIntersector {
    graph: Arc<Graph>,
    search_beam: f32,
    output_beam: f32,
    min_active: i32,
    max_active: i32,
    allow_partial: bool,
    num_seqs: usize,
}

impl OnlineIntersector {
    pub fn new(
        graph: Arc<Graph>,
        search_beam: f32,
        output_beam: f32,
        min_active: i32,
        max_active: i32,
        allow_partial: bool,
        num_seqs: usize,
    ) -> Result<Self> {
        if graph.num_fsas_stored() != 1 {
            return Err(IntersectError::ShapeMismatch(
                "online decoding requires a single graph shared across the whole batch".into(),
            ));
        }
        if max_active <= min_active {
            return Err(IntersectError::ConfigInvalid(format!(
                "max_active ({}) must be greater than min_active ({})",
                max_active, min_active
            )));
        }
        Ok(OnlineIntersector {
            graph,
            search_beam,
            output_beam,
            min_active,
            max_active,
            allow_partial,
            num_seqs,
        })
    }

    /// Advances every sequence in `decode_states` by one chunk of
    /// `scores`, each fsa's last row reserved as the lookahead/boundary
    /// row that seeds the next prune anchor rather than a real acoustic
    /// frame (`chunk_size = scores.num_frames(seq) - 1`). Returns a
    /// partial lattice reflecting everything decoded and pruned so far,
    /// without needing to mutate any state beyond what this chunk
    /// genuinely advances. `is_final_chunk` marks the utterance's last
    /// call, enabling allow-partial's final-frame relabeling.
    pub fn decode(&self, scores: &DenseScores, decode_states: &mut [DecodeState], is_final_chunk: bool) -> Result<(Lattice, Vec<i32>)> {
        if decode_states.len() != self.num_seqs || scores.num_fsas() != self.num_seqs {
            return Err(IntersectError::ShapeMismatch(format!(
                "expected {} sequences, got {} decode states and {} score rows",
                self.num_seqs,
                decode_states.len(),
                scores.num_fsas()
            )));
        }

        let mut per_seq_lattices = Vec::with_capacity(self.num_seqs);
        for seq in 0..self.num_seqs {
            let seq_scores = scores.single_fsa_view(seq);
            let lattice = self.decode_one(&seq_scores, &mut decode_states[seq], is_final_chunk)?;
            per_seq_lattices.push(lattice);
        }
        Ok(merge_lattices(per_seq_lattices))
    }

    /// Runs one sequence's chunk: seeds a small local `FrameStore` from
    /// `state`'s last (arc-less) frame, steps `ForwardPass` over this
    /// chunk's real rows, appends the freshly produced frames onto
    /// `state`'s persistent history, prunes the window the configured
    /// schedule names, then assembles a read-only partial lattice from
    /// everything accumulated so far.
    fn decode_one(&self, seq_scores: &DenseScores, state: &mut DecodeState, is_final_chunk: bool) -> Result<(Lattice, Vec<i32>)> {
        let chunk_size = seq_scores.num_frames(0).checked_sub(1).ok_or_else(|| {
            IntersectError::ShapeMismatch("chunk must carry at least one real frame plus the reserved boundary row".into())
        })?;
        if chunk_size == 0 {
            return Err(IntersectError::ShapeMismatch("chunk has no real frames to decode".into()));
        }

        let beam_value = state.beam.unwrap_or(self.search_beam);
        let mut beam = BeamController::new(1, self.search_beam, self.output_beam, self.min_active, self.max_active)?;
        beam.set_beam(0, beam_value);

        let final_t_local = vec![if is_final_chunk { chunk_size } else { usize::MAX }];
        let owned_scores = Arc::new(seq_scores.clone());
        let mut forward = ForwardPass::new(Arc::clone(&self.graph), owned_scores, final_t_local, self.allow_partial, true, beam)?;

        let prior_len = state.frames.len();
        let t_prior = prior_len - 1;

        let mut local_store = FrameStore::with_capacity(chunk_size + 1);
        local_store.push(state.frames.frame(t_prior).clone());
        for t in 0..chunk_size {
            forward.step(&mut local_store, t);
        }

        state.beam = Some(forward.beam.beam(0));

        state.frames.reserve(chunk_size);
        for local_frame in local_store.into_frames().into_iter().skip(1) {
            state.frames.push(local_frame);
        }

        let end_t = t_prior + chunk_size;
        let begin_t = t_prior.saturating_sub(2);
        let pruner = BackwardPruner::new(Arc::clone(&self.graph), self.output_beam);
        pruner.prune_time_range(&mut state.frames, begin_t, end_t);

        if is_final_chunk {
            state.true_final_t = Some(end_t);
        }

        let assembly_final_t = vec![state.true_final_t.unwrap_or(usize::MAX)];
        let AssembleOutput { lattice, arc_map_a, .. } = assemble(state.frames.frames(), &self.graph, None, &assembly_final_t, self.allow_partial);
        Ok((lattice, arc_map_a))
    }
}

/// Merges `num_seqs` independent single-fsa lattices into one batched
/// `Lattice`, offsetting each sequence's state/arc indices by the running
/// total of states/arcs already emitted by earlier sequences.
fn merge_lattices(per_seq: Vec<(Lattice, Vec<i32>)>) -> (Lattice, Vec<i32>) {
    let mut state_counts = vec![0i32; per_seq.len()];
    let mut arc_counts = vec![0i32; per_seq.len()];
    for (i, (lat, _)) in per_seq.iter().enumerate() {
        state_counts[i] = lat.state_shape.num_elements() as i32;
        arc_counts[i] = lat.arc_shape.num_elements() as i32;
    }
    let state_shape = RaggedShape::from_row_splits(exclusive_sum(&state_counts));
    let arc_shape = RaggedShape::from_row_splits(exclusive_sum(&arc_counts));

    let mut arcs = Vec::new();
    let mut arc_map_a = Vec::new();
    let state_offsets = state_shape.row_splits();
    for (i, (lat, map_a)) in per_seq.into_iter().enumerate() {
        let offset = state_offsets[i];
        for arc in &lat.arcs {
            arcs.push(LatticeArc {
                src: arc.src + offset,
                dest: arc.dest + offset,
                label: arc.label,
                score: arc.score,
            });
        }
        arc_map_a.extend(map_a);
    }

    (Lattice { state_shape, arc_shape, arcs }, arc_map_a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphArc;

    fn linear_chain_graph() -> Arc<Graph> {
        let state_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 1, 2, 2]);
        let arcs = vec![
            GraphArc { src_state: 0, dest_state: 1, label: 0, score: 0.0 },
            GraphArc { src_state: 1, dest_state: 2, label: -1, score: 0.0 },
        ];
        Arc::new(Graph::new(state_shape, arc_shape, arcs).unwrap())
    }

    #[test]
    fn rejects_per_sequence_graph() {
        let state_shape = RaggedShape::from_row_splits(vec![0, 1, 2]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 0, 0]);
        let graph = Arc::new(Graph::new(state_shape, arc_shape, Vec::new()).unwrap());
        let err = OnlineIntersector::new(graph, 10.0, 8.0, 1, 10, false, 1).unwrap_err();
        assert!(matches!(err, IntersectError::ShapeMismatch(_)));
    }

    #[test]
    fn fresh_decode_state_has_one_start_state() {
        let state = DecodeState::new();
        assert_eq!(state.frames.len(), 1);
        assert_eq!(state.frames.frame(0).states.len(), 1);
        assert!(!state.is_finished());
    }

    #[test]
    fn two_chunk_resumption_reaches_final_state() {
        let graph = linear_chain_graph();
        let online = OnlineIntersector::new(graph, 10.0, 8.0, 1, 10, false, 1).unwrap();
        let mut states = vec![DecodeState::new()];

        // Chunk 1: one real frame (label 0 scores high) + one boundary row.
        let chunk1_shape = RaggedShape::from_row_splits(vec![0, 2]);
        let chunk1 = DenseScores::new(
            chunk1_shape,
            3,
            vec![
                f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY,
                f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY,
            ],
        )
        .unwrap();
        online.decode(&chunk1, &mut states, false).unwrap();
        assert!(!states[0].is_finished());

        // Chunk 2: real frame 0 scores the label(-1) arc taken while leaving
        // the mid state (acoustic lookup is keyed by the source frame); the
        // next row is never read (that state is the graph's final state,
        // with no outgoing arcs) and the last row is the reserved boundary.
        let chunk2_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let chunk2 = DenseScores::new(
            chunk2_shape,
            3,
            vec![
                0.0, f32::NEG_INFINITY, f32::NEG_INFINITY,
                0.0, f32::NEG_INFINITY, f32::NEG_INFINITY,
                0.0, f32::NEG_INFINITY, f32::NEG_INFINITY,
            ],
        )
        .unwrap();
        let (lattice, arc_map_a) = online.decode(&chunk2, &mut states, true).unwrap();

        assert!(states[0].is_finished());
        assert_eq!(lattice.state_shape.num_elements(), 3, "start, mid, and final state all survive");
        assert_eq!(lattice.arcs.len(), 2);
        assert_eq!(arc_map_a, vec![0, 1]);
    }

    #[test]
    fn rejects_mismatched_decode_state_count() {
        let graph = linear_chain_graph();
        let online = OnlineIntersector::new(graph, 10.0, 8.0, 1, 10, false, 2).unwrap();
        let frame_shape = RaggedShape::from_row_splits(vec![0, 2]);
        let scores = DenseScores::new(frame_shape, 3, vec![0.0; 6]).unwrap();
        let mut states = vec![DecodeState::new()];
        let err = online.decode(&scores, &mut states, false).unwrap_err();
        assert!(matches!(err, IntersectError::ShapeMismatch(_)));
    }
}
