// Final lattice assembly (SPEC_FULL.md §4.7): merges the per-frame ragged
// arc tables FrameStore accumulated into a single three-axis ragged
// `Lattice` (the frame axis is flattened away, each surviving (frame,
// state) becoming one output state for its fsa), producing the two
// arc maps callers use to trace output arcs back to their inputs.
//
// The literal `final_arcs_shape`/frame-`T+1` bookkeeping some designs use
// is subsumed here by the terminal-frame convention `FrameStore` already
// uses for `BackwardPruner` (see `backward.rs`): the last `FrameInfo` in
// the store *is* that extra frame, populated by expanding the true final
// frame's (possibly allow-partial-rewritten) arcs, so no separate
// synthesis step is needed at assembly time.
use crate::graph::{DenseScores, Graph};
use crate::ragged::{exclusive_sum, RaggedShape};
use crate::types::FrameInfo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeArc {
    pub src: i32,
    pub dest: i32,
    pub label: i32,
    pub score: f32,
}

/// The final output: three-axis ragged `[fsa][state][arc]`.
pub struct Lattice {
    pub state_shape: RaggedShape,
    pub arc_shape: RaggedShape,
    pub arcs: Vec<LatticeArc>,
}

pub struct AssembleOutput {
    pub lattice: Lattice,
    /// Index into `graph.arcs`, or `-1` for a synthesized allow-partial arc.
    pub arc_map_a: Vec<i32>,
    /// Index into the dense score matrix, or `-1` when not applicable
    /// (synthesized arcs) or not produced at all (online mode, empty).
    pub arc_map_b: Vec<i32>,
}

/// `scores` is `None` in online mode, where `arc_map_b` has no meaning
/// because `b_fsas` only covers the current chunk.
pub fn assemble(frames: &[FrameInfo], graph: &Graph, scores: Option<&DenseScores>, final_t: &[usize], allow_partial: bool) -> AssembleOutput {
    let num_fsas = frames[0].state_shape.num_rows();

    let mut local_index: Vec<Vec<i32>> = frames.iter().map(|f| vec![-1i32; f.states.len()]).collect();
    let mut fsa_state_counts = vec![0i32; num_fsas];
    let mut out_states: Vec<(usize, usize)> = Vec::new();

    for fsa in 0..num_fsas {
        for (t, frame) in frames.iter().enumerate() {
            for global_state in frame.state_shape.row_range(fsa) {
                // The start state is always emitted (every input fsa yields
                // at least a start state); later frames only keep states
                // that survived backward pruning.
                let keep = t == 0 || frame.states[global_state].is_kept_by_backward();
                if keep {
                    local_index[t][global_state] = fsa_state_counts[fsa];
                    fsa_state_counts[fsa] += 1;
                    out_states.push((t, global_state));
                }
            }
        }
    }
    let state_shape = RaggedShape::from_row_splits(exclusive_sum(&fsa_state_counts));

    let mut arc_rows: Vec<Vec<LatticeArc>> = vec![Vec::new(); out_states.len()];
    let mut map_a_rows: Vec<Vec<i32>> = vec![Vec::new(); out_states.len()];
    let mut map_b_rows: Vec<Vec<i32>> = vec![Vec::new(); out_states.len()];

    for (out_idx, &(t, global_state)) in out_states.iter().enumerate() {
        if t + 1 >= frames.len() {
            continue; // terminal frame: no outgoing arcs
        }
        let frame = &frames[t];
        let fsa = frame.fsa_of_global_state(global_state) as usize;
        for arc_idx in frame.arc_shape.row_range(global_state) {
            let arc = &frame.arcs[arc_idx];
            if arc.is_pruned() {
                continue;
            }
            let dest_out = local_index[t + 1][arc.dest_state_idx1() as usize];
            debug_assert!(dest_out >= 0, "a surviving arc must target a kept destination state");

            let original_label = graph.arcs[arc.graph_arc as usize].label;
            let is_last_real_frame = t + 1 == final_t[fsa];
            let synthesized = is_last_real_frame && allow_partial && original_label != -1;
            let output_label = if synthesized { -1 } else { original_label };
            let mapped_graph_arc = if synthesized { -1 } else { arc.graph_arc };

            arc_rows[out_idx].push(LatticeArc {
                src: out_idx as i32,
                dest: dest_out,
                label: output_label,
                score: arc.arc_loglike,
            });
            map_a_rows[out_idx].push(mapped_graph_arc);

            if let Some(scores) = scores {
                let b_map = if synthesized {
                    -1
                } else {
                    let global_frame = scores.frame_row_offset(fsa) + t as i32;
                    global_frame * scores.width as i32 + (output_label + 1)
                };
                map_b_rows[out_idx].push(b_map);
            }
        }
    }

    let arc_counts: Vec<i32> = arc_rows.iter().map(|r| r.len() as i32).collect();
    let arc_shape = RaggedShape::from_row_splits(exclusive_sum(&arc_counts));
    let arcs: Vec<LatticeArc> = arc_rows.into_iter().flatten().collect();
    let arc_map_a: Vec<i32> = map_a_rows.into_iter().flatten().collect();
    let arc_map_b: Vec<i32> = if scores.is_some() { map_b_rows.into_iter().flatten().collect() } else { Vec::new() };

    AssembleOutput {
        lattice: Lattice { state_shape, arc_shape, arcs },
        arc_map_a,
        arc_map_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphArc;
    use crate::types::{ArcInfo, StateInfo};

    fn small_graph() -> Graph {
        // 0 --label=0,score=0--> 1 --label=-1,score=0--> (final)
        let state_shape = RaggedShape::from_row_splits(vec![0, 2]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 1, 1]);
        let arcs = vec![GraphArc { src_state: 0, dest_state: 1, label: 0, score: 0.0 }];
        Graph::new(state_shape, arc_shape, arcs).unwrap()
    }

    fn kept_state(a_state: i32, forward: f32, backward: f32) -> StateInfo {
        let s = StateInfo::new(a_state);
        s.update_forward_max(forward);
        unsafe { s.set_backward_loglike(backward) };
        s
    }

    #[test]
    fn linear_path_produces_two_states_one_arc() {
        let graph = small_graph();
        let mut f0 = FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![kept_state(0, 0.0, 0.0)],
            arc_shape: RaggedShape::from_row_splits(vec![0, 1]),
            arcs: vec![ArcInfo::new(0, 0.0, 0.0, 1)],
        };
        f0.arcs[0].set_dest_state_idx1(0);
        let f1 = FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![kept_state(1, 0.0, 0.0)],
            arc_shape: RaggedShape::empty(1),
            arcs: Vec::new(),
        };
        let frames = vec![f0, f1];

        let out = assemble(&frames, &graph, None, &[1], false);
        assert_eq!(out.lattice.state_shape.num_elements(), 2);
        assert_eq!(out.lattice.arcs.len(), 1);
        assert_eq!(out.lattice.arcs[0], LatticeArc { src: 0, dest: 1, label: 0, score: 0.0 });
        assert_eq!(out.arc_map_a, vec![0]);
    }

    #[test]
    fn start_state_always_present_even_with_no_survivors() {
        let graph = small_graph();
        let f0 = FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![StateInfo::new(0)], // backward never set: not kept
            arc_shape: RaggedShape::from_row_splits(vec![0, 1]),
            arcs: vec![ArcInfo::new(0, 0.0, 0.0, 1)], // never marked non-pruned
        };
        let f1 = FrameInfo {
            state_shape: RaggedShape::empty(1),
            states: Vec::new(),
            arc_shape: RaggedShape::empty(0),
            arcs: Vec::new(),
        };
        let frames = vec![f0, f1];

        let out = assemble(&frames, &graph, None, &[1], false);
        assert_eq!(out.lattice.state_shape.num_elements(), 1, "start state is always emitted");
        assert_eq!(out.lattice.arcs.len(), 0, "the only arc was never unpruned");
    }

    #[test]
    fn allow_partial_relabels_final_frame_arc() {
        // State 0's only arc is non-final (label 0); on the true last
        // frame, allow_partial rewrites it to -1 for output purposes.
        let state_shape = RaggedShape::from_row_splits(vec![0, 2]);
        let arc_shape = RaggedShape::from_row_splits(vec![0, 1, 1]);
        let arcs = vec![GraphArc { src_state: 0, dest_state: 1, label: 0, score: -1.0 }];
        let graph = Graph::new(state_shape, arc_shape, arcs).unwrap();

        let mut f0 = FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![kept_state(0, 0.0, 1.0)],
            arc_shape: RaggedShape::from_row_splits(vec![0, 1]),
            arcs: vec![ArcInfo::new(0, -1.0, -1.0, 1)],
        };
        f0.arcs[0].set_dest_state_idx1(0);
        let f1 = FrameInfo {
            state_shape: RaggedShape::from_row_splits(vec![0, 1]),
            states: vec![kept_state(1, -1.0, 0.0)],
            arc_shape: RaggedShape::empty(1),
            arcs: Vec::new(),
        };
        let frames = vec![f0, f1];

        let out = assemble(&frames, &graph, None, &[1], true);
        assert_eq!(out.lattice.arcs[0].label, -1);
        assert_eq!(out.arc_map_a, vec![-1]);
    }
}
