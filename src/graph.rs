// The decoding graph (`a_fsas`) and the dense acoustic scores (`b_fsas`),
// per SPEC_FULL.md §3. Both are external inputs in the real system (produced
// by FSA I/O and by the neural-network-to-dense-FSA conversion, both out of
// scope here); this module only defines the shapes this engine consumes.
use crate::error::{IntersectError, Result};
use crate::ragged::RaggedShape;
use rustc_hash::FxHashMap;

/// One arc of a decoding graph. `src_state`/`dest_state` are indices into
/// the owning FSA's local state list (`src_state_idx1`/`dest_state_idx1` in
/// SPEC_FULL.md's naming -- "idx1" marks a within-FSA index, as opposed to
/// the flattened graph-wide index `Graph` otherwise works in).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphArc {
    pub src_state: i32,
    pub dest_state: i32,
    pub label: i32,
    pub score: f32,
}

/// A batch of decoding graphs, three-axis ragged: `[fsa][state][arc]`.
/// Either one graph per utterance (`stride == 1`) or a single graph shared
/// across the whole batch (`stride == 0`), per SPEC_FULL.md §3.
pub struct Graph {
    pub stride: u8,
    state_shape: RaggedShape,
    arc_shape: RaggedShape,
    pub arcs: Vec<GraphArc>,
}

impl Graph {
    pub fn new(state_shape: RaggedShape, arc_shape: RaggedShape, arcs: Vec<GraphArc>) -> Result<Self> {
        if arc_shape.num_rows() != state_shape.num_elements() {
            return Err(IntersectError::ShapeMismatch(format!(
                "graph arc_shape has {} rows but state_shape has {} states",
                arc_shape.num_rows(),
                state_shape.num_elements()
            )));
        }
        let stride = if state_shape.num_rows() == 1 { 0 } else { 1 };
        Ok(Graph {
            stride,
            state_shape,
            arc_shape,
            arcs,
        })
    }

    /// Builds a `Graph` from arcs given in any order, each tagged with the
    /// (global, not per-fsa-local) source state it leaves from. Grouping by
    /// source state is the one hashmap-shaped step in an otherwise
    /// ragged-array pipeline, since callers that assemble a decoding graph
    /// from some other representation (a lexicon, a compiled rules file)
    /// rarely hand arcs over already sorted by `src_state`.
    pub fn from_unsorted_arcs(state_shape: RaggedShape, mut arcs: Vec<GraphArc>) -> Result<Self> {
        let num_states = state_shape.num_elements();
        let mut by_src: FxHashMap<i32, Vec<usize>> = FxHashMap::default();
        for (idx, arc) in arcs.iter().enumerate() {
            by_src.entry(arc.src_state).or_default().push(idx);
        }

        let mut arc_counts = vec![0i32; num_states];
        for (&src, idxs) in &by_src {
            if (src as usize) < num_states {
                arc_counts[src as usize] = idxs.len() as i32;
            }
        }
        let arc_shape = RaggedShape::from_row_splits(crate::ragged::exclusive_sum(&arc_counts));

        let mut ordered: Vec<GraphArc> = Vec::with_capacity(arcs.len());
        for src in 0..num_states {
            if let Some(idxs) = by_src.get(&(src as i32)) {
                for &idx in idxs {
                    ordered.push(arcs[idx]);
                }
            }
        }
        arcs = ordered;

        Self::new(state_shape, arc_shape, arcs)
    }

    pub fn num_fsas_stored(&self) -> usize {
        self.state_shape.num_rows()
    }

    /// Resolve a logical batch fsa index to the graph's own row, honoring
    /// `a_fsas_stride`.
    #[inline]
    pub fn fsa_row(&self, logical_fsa: usize) -> usize {
        if self.stride == 0 {
            0
        } else {
            logical_fsa
        }
    }

    pub fn num_states(&self, logical_fsa: usize) -> usize {
        self.state_shape.row_len(self.fsa_row(logical_fsa))
    }

    /// Global (flattened) state index for `(logical_fsa, local_state)`.
    pub fn global_state(&self, logical_fsa: usize, local_state: i32) -> i32 {
        self.state_shape.row_splits()[self.fsa_row(logical_fsa)] + local_state
    }

    pub fn start_state_global(&self, logical_fsa: usize) -> i32 {
        self.global_state(logical_fsa, 0)
    }

    /// Local index of the final state (the last state in the FSA), or
    /// `None` if the FSA has zero states.
    pub fn final_state_local(&self, logical_fsa: usize) -> Option<i32> {
        let n = self.num_states(logical_fsa);
        if n == 0 {
            None
        } else {
            Some(n as i32 - 1)
        }
    }

    /// Inverse of `global_state`: the local index within `logical_fsa` of
    /// a previously-resolved global state index.
    pub fn local_state(&self, logical_fsa: usize, global_state: i32) -> i32 {
        global_state - self.state_shape.row_splits()[self.fsa_row(logical_fsa)]
    }

    pub fn arcs_of_global_state(&self, global_state: i32) -> &[GraphArc] {
        let range = self.arc_shape.row_range(global_state as usize);
        &self.arcs[range]
    }

    pub fn arc_offset(&self, global_state: i32) -> i32 {
        self.arc_shape.row_splits()[global_state as usize]
    }
}

/// Dense per-frame acoustic scores (`b_fsas`): one row of length `width`
/// (`L + 1`, column 0 reserved for the final symbol) per frame, ragged over
/// frame count per utterance.
#[derive(Clone)]
pub struct DenseScores {
    frame_shape: RaggedShape,
    pub width: usize,
    scores: Vec<f32>,
}

impl DenseScores {
    pub fn new(frame_shape: RaggedShape, width: usize, scores: Vec<f32>) -> Result<Self> {
        if scores.len() != frame_shape.num_elements() * width {
            return Err(IntersectError::ShapeMismatch(format!(
                "dense scores length {} does not match {} frames * width {}",
                scores.len(),
                frame_shape.num_elements(),
                width
            )));
        }
        Ok(DenseScores {
            frame_shape,
            width,
            scores,
        })
    }

    pub fn num_fsas(&self) -> usize {
        self.frame_shape.num_rows()
    }

    pub fn num_frames(&self, fsa: usize) -> usize {
        self.frame_shape.row_len(fsa)
    }

    pub fn max_frames(&self) -> usize {
        (0..self.num_fsas())
            .map(|f| self.num_frames(f))
            .max()
            .unwrap_or(0)
    }

    pub fn frame_row_offset(&self, fsa: usize) -> i32 {
        self.frame_shape.row_splits()[fsa]
    }

    /// The dense score vector for `(fsa, frame)`; length `width`.
    pub fn frame(&self, fsa: usize, frame: usize) -> &[f32] {
        let global = self.frame_row_offset(fsa) as usize + frame;
        &self.scores[global * self.width..(global + 1) * self.width]
    }

    pub fn acoustic(&self, fsa: usize, frame: usize, label: i32) -> f32 {
        let col = (label + 1) as usize;
        self.frame(fsa, frame)[col]
    }

    /// Copies one fsa's rows out into a standalone single-fsa `DenseScores`,
    /// so each of `OnlineIntersector`'s per-sequence pipelines can be handed
    /// its own self-contained chunk view with frame-local (0-based) indices.
    pub fn single_fsa_view(&self, fsa: usize) -> DenseScores {
        let num_frames = self.num_frames(fsa);
        let start = self.frame_row_offset(fsa) as usize * self.width;
        let end = start + num_frames * self.width;
        DenseScores {
            frame_shape: RaggedShape::from_row_splits(vec![0, num_frames as i32]),
            width: self.width,
            scores: self.scores[start..end].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ragged::RaggedShape;

    fn linear_chain_graph() -> Graph {
        // states: 0 --label=1,score=0--> 1 --label=-1,score=0--> 2
        let state_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 1, 1, 1]);
        let arcs = vec![GraphArc {
            src_state: 0,
            dest_state: 1,
            label: 1,
            score: 0.0,
        }];
        Graph::new(state_shape, arc_shape, arcs).unwrap()
    }

    #[test]
    fn shared_graph_detected_by_stride() {
        let graph = linear_chain_graph();
        assert_eq!(graph.stride, 0);
        assert_eq!(graph.fsa_row(0), 0);
        assert_eq!(graph.fsa_row(3), 0);
        assert_eq!(graph.num_states(3), 3);
    }

    #[test]
    fn per_utterance_graph_uses_own_row() {
        let state_shape = RaggedShape::from_row_splits(vec![0, 2, 5]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 1, 1, 1, 1, 1]);
        let arcs = vec![GraphArc {
            src_state: 0,
            dest_state: 1,
            label: 0,
            score: 0.0,
        }];
        let graph = Graph::new(state_shape, arc_shape, arcs).unwrap();
        assert_eq!(graph.stride, 1);
        assert_eq!(graph.num_states(0), 2);
        assert_eq!(graph.num_states(1), 3);
        assert_eq!(graph.global_state(1, 0), 2);
        assert_eq!(graph.final_state_local(0), Some(1));
    }

    #[test]
    fn dense_scores_acoustic_lookup() {
        let frame_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let scores = vec![
            f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY,
            f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY,
            0.0, f32::NEG_INFINITY, f32::NEG_INFINITY,
        ];
        let dense = DenseScores::new(frame_shape, 3, scores).unwrap();
        assert_eq!(dense.acoustic(0, 0, 0), 0.0); // label 0 -> column 1
        assert_eq!(dense.acoustic(0, 2, -1), 0.0); // label -1 -> column 0
        assert_eq!(dense.max_frames(), 3);
    }

    #[test]
    fn from_unsorted_arcs_groups_by_source_state() {
        let state_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let arcs = vec![
            GraphArc { src_state: 1, dest_state: 2, label: -1, score: 0.0 },
            GraphArc { src_state: 0, dest_state: 1, label: 0, score: -1.0 },
        ];
        let graph = Graph::from_unsorted_arcs(state_shape, arcs).unwrap();
        assert_eq!(graph.arcs_of_global_state(0).len(), 1);
        assert_eq!(graph.arcs_of_global_state(0)[0].dest_state, 1);
        assert_eq!(graph.arcs_of_global_state(1).len(), 1);
        assert_eq!(graph.arcs_of_global_state(1)[0].label, -1);
        assert_eq!(graph.arcs_of_global_state(2).len(), 0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let frame_shape = RaggedShape::from_row_splits(vec![0, 3]);
        let err = DenseScores::new(frame_shape, 3, vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, IntersectError::ShapeMismatch(_)));
    }
}
