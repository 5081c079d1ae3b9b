// The public batch entry point (SPEC_FULL.md §6) and the two-thread
// concurrency model that drives it (§5): ForwardPass runs on the caller's
// thread, handing completed frame ranges off to a Backward worker thread
// through a pair of `Handshake`s, `forward_gate` starting at 1 so the very
// first handoff doesn't have to wait on a release that hasn't happened yet.
use crate::assembler::{assemble, AssembleOutput};
use crate::beam::BeamController;
use crate::environment::{PRUNE_NUM_FRAMES, PRUNE_SHIFT};
use crate::error::{IntersectError, Result};
use crate::frame_store::{FrameStore, PruneSchedule};
use crate::backward::BackwardPruner;
use crate::forward::ForwardPass;
use crate::graph::{DenseScores, Graph};
use crate::ragged::{exclusive_sum, RaggedShape};
use crate::types::{FrameInfo, StateInfo};
use log::debug;
use std::cell::UnsafeCell;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::handshake::Handshake;

/// Beam-search knobs, mirroring `BeamController::new`'s parameters plus
/// the allow-partial flag (SPEC_FULL.md §3, §4.3).
pub struct IntersectParams {
    pub search_beam: f32,
    pub output_beam: f32,
    pub min_active: i32,
    pub max_active: i32,
    pub allow_partial: bool,
}

pub struct IntersectOutput {
    pub lattice: crate::assembler::Lattice,
    pub arc_map_a: Vec<i32>,
    pub arc_map_b: Vec<i32>,
}

/// `FrameStore` shared between the calling thread (ForwardPass) and the
/// spawned Backward worker. Soundness rests on two facts enforced by the
/// caller: the store is pre-sized with `with_capacity(total_frames)` so
/// `push` never reallocates (see `frame_store::FrameStore::push`), and the
/// handshake protocol ensures the two threads never touch the same frame
/// index at the same time -- ForwardPass only writes frame `t`'s arcs and
/// pushes frame `t+1` before handing a range off, and BackwardPruner only
/// touches frames strictly below wherever ForwardPass currently is.
struct SharedStore(UnsafeCell<FrameStore>);

unsafe impl Sync for SharedStore {}

impl SharedStore {
    fn new(store: FrameStore) -> Self {
        SharedStore(UnsafeCell::new(store))
    }

    /// # Safety
    /// Caller must hold the handshake token that grants exclusive access
    /// to the frame range it is about to touch.
    unsafe fn get(&self) -> &mut FrameStore {
        &mut *self.0.get()
    }
}

fn validate(graph: &Graph, scores: &DenseScores, params: &IntersectParams) -> Result<()> {
    let num_fsas = scores.num_fsas();
    let stored = graph.num_fsas_stored();
    if stored != 1 && stored != num_fsas {
        return Err(IntersectError::ShapeMismatch(format!(
            "a_fsas has {} fsas, b_fsas has {}: must match or a_fsas must be a single shared graph",
            stored, num_fsas
        )));
    }
    if params.max_active <= params.min_active {
        return Err(IntersectError::ConfigInvalid(format!(
            "max_active ({}) must be greater than min_active ({})",
            params.max_active, params.min_active
        )));
    }
    Ok(())
}

fn start_frame(graph: &Graph, num_fsas: usize) -> FrameInfo {
    let mut states = Vec::new();
    let mut counts = vec![0i32; num_fsas];
    for fsa in 0..num_fsas {
        if graph.num_states(fsa) > 0 {
            let s = StateInfo::new(0);
            s.update_forward_max(0.0);
            states.push(s);
            counts[fsa] = 1;
        }
    }
    FrameInfo {
        state_shape: RaggedShape::from_row_splits(exclusive_sum(&counts)),
        arc_shape: RaggedShape::empty(states.len()),
        states,
        arcs: Vec::new(),
    }
}

/// Runs the pruned forward/backward intersection over a whole batch at
/// once (no chunking). See `online` for the incremental variant.
pub fn intersect(graph: Graph, scores: DenseScores, params: IntersectParams) -> Result<IntersectOutput> {
    validate(&graph, &scores, &params)?;

    let num_fsas = scores.num_fsas();
    let final_t: Vec<usize> = (0..num_fsas).map(|f| scores.num_frames(f)).collect();
    let max_frames = scores.max_frames();

    let graph = Arc::new(graph);
    let scores = Arc::new(scores);

    let mut store = FrameStore::with_capacity(max_frames + 1);
    store.push(start_frame(&graph, num_fsas));
    let shared = Arc::new(SharedStore::new(store));

    let beam = BeamController::new(num_fsas, params.search_beam, params.output_beam, params.min_active, params.max_active)?;
    let mut forward = ForwardPass::new(Arc::clone(&graph), Arc::clone(&scores), final_t.clone(), params.allow_partial, false, beam)?;
    let backward = BackwardPruner::new(Arc::clone(&graph), params.output_beam);

    let schedule = PruneSchedule::new(*PRUNE_NUM_FRAMES, *PRUNE_SHIFT);

    let backward_ready = Arc::new(Handshake::new(0));
    let forward_gate = Arc::new(Handshake::new(1));
    let (tx, rx) = mpsc::channel::<(usize, usize)>();

    let worker_store = Arc::clone(&shared);
    let worker_ready = Arc::clone(&backward_ready);
    let worker_gate = Arc::clone(&forward_gate);
    let backward_handle = thread::spawn(move || {
        for (begin_t, end_t) in rx {
            worker_ready.acquire();
            // Safety: `worker_ready.acquire()` only returns after the
            // forward thread's matching `release`, which it only issues
            // once it has finished writing everything up to `end_t`.
            let store = unsafe { worker_store.get() };
            backward.prune_time_range(store, begin_t, end_t);
            worker_gate.release();
        }
    });

    let mut last_signaled_end = 0usize;
    for t in 0..max_frames {
        // Safety: between handoffs this thread is the sole accessor; the
        // `forward_gate.acquire()` below blocks until the backward worker
        // has released the range it was granted.
        let store = unsafe { shared.get() };
        forward.step(store, t);

        if schedule.should_signal(t) {
            let (begin_t, end_t) = schedule.range_for_signal(t);
            debug!("engine: handing off prune window [{}, {}) to backward worker", begin_t, end_t);
            tx.send((begin_t, end_t))
                .map_err(|_| IntersectError::InternalInvariantViolated("backward worker hung up early".into()))?;
            backward_ready.release();
            forward_gate.acquire();
            last_signaled_end = end_t;
        }
    }
    if let Some((begin_t, end_t)) = schedule.final_range(max_frames, last_signaled_end) {
        debug!("engine: handing off final prune window [{}, {}) to backward worker", begin_t, end_t);
        tx.send((begin_t, end_t))
            .map_err(|_| IntersectError::InternalInvariantViolated("backward worker hung up early".into()))?;
        backward_ready.release();
        forward_gate.acquire();
    }
    drop(tx);
    backward_handle
        .join()
        .map_err(|_| IntersectError::InternalInvariantViolated("backward worker panicked".into()))?;

    let store = unsafe { shared.get() };
    let AssembleOutput { lattice, arc_map_a, arc_map_b } = assemble(store.frames(), &graph, Some(&scores), &final_t, params.allow_partial);
    Ok(IntersectOutput { lattice, arc_map_a, arc_map_b })
}
