// Per-utterance dynamic beam and per-frame pruning cutoffs (SPEC_FULL.md
// §4.3). One `BeamController` is owned by ForwardPass (batch mode) or by
// each `DecodeState` (online mode, one beam per utterance carried across
// chunks).
use crate::error::{IntersectError, Result};

pub struct BeamController {
    pub search_beam: f32,
    pub output_beam: f32,
    pub min_active: i32,
    pub max_active: i32,
    beams: Vec<f32>,
}

impl BeamController {
    pub fn new(
        num_fsas: usize,
        search_beam: f32,
        output_beam: f32,
        min_active: i32,
        max_active: i32,
    ) -> Result<Self> {
        if search_beam <= 0.0 || output_beam <= 0.0 {
            return Err(IntersectError::ConfigInvalid(
                "search_beam and output_beam must be positive".into(),
            ));
        }
        if max_active <= min_active {
            return Err(IntersectError::ConfigInvalid(format!(
                "max_active ({}) must exceed min_active ({})",
                max_active, min_active
            )));
        }
        Ok(BeamController {
            search_beam,
            output_beam,
            min_active,
            max_active,
            beams: vec![search_beam; num_fsas],
        })
    }

    pub fn beam(&self, fsa: usize) -> f32 {
        self.beams[fsa]
    }

    /// Load a previously-persisted beam (online mode resuming a chunk).
    pub fn set_beam(&mut self, fsa: usize, beam: f32) {
        self.beams[fsa] = beam;
    }

    /// Advance `fsa`'s beam for frame `t` and return the pruning cutoff
    /// `best - beam`.
    ///
    /// `final_t` is the utterance's total frame count (one past the last
    /// real frame index); `online` suppresses both the near-end
    /// `min_active` relaxation and the last-frame `beam = +inf` behavior,
    /// since a chunk boundary is not necessarily the utterance's end.
    pub fn update(&mut self, fsa: usize, best: f32, active: i32, t: usize, final_t: usize, online: bool) -> f32 {
        let mut effective_min_active = self.min_active;
        if !online && t + 5 >= final_t {
            effective_min_active = effective_min_active.max(self.max_active / 2);
        }

        let mut beam = self.beams[fsa];
        if active <= self.max_active {
            if active >= effective_min_active || active == 0 {
                beam = 0.8 * beam + 0.2 * self.search_beam;
            } else {
                beam = beam.max(self.search_beam) * 1.25;
            }
        } else if online || t + 5 < final_t {
            beam = beam.min(self.search_beam) * 0.8;
        }
        // else: too many active on a near-final frame, leave beam as-is
        // to protect the surviving final arcs.

        let is_last_real_frame = !online && t + 1 >= final_t;
        if is_last_real_frame {
            beam = f32::INFINITY;
        }

        self.beams[fsa] = beam;
        best - beam
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_active_bounds() {
        let err = BeamController::new(1, 10.0, 8.0, 5, 5).unwrap_err();
        assert!(matches!(err, IntersectError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_non_positive_beams() {
        assert!(BeamController::new(1, 0.0, 8.0, 0, 10).is_err());
        assert!(BeamController::new(1, 10.0, -1.0, 0, 10).is_err());
    }

    #[test]
    fn grows_when_below_min_active() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 5, 20).unwrap();
        let cutoff = bc.update(0, 0.0, 2, 0, 100, false);
        assert!(bc.beam(0) > 10.0, "beam should grow: {}", bc.beam(0));
        assert_eq!(cutoff, 0.0 - bc.beam(0));
    }

    #[test]
    fn returns_toward_search_beam_within_bounds() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 1, 20).unwrap();
        bc.set_beam(0, 50.0);
        bc.update(0, 0.0, 10, 0, 100, false);
        assert!((bc.beam(0) - (0.8 * 50.0 + 0.2 * 10.0)).abs() < 1e-5);
    }

    #[test]
    fn shrinks_when_over_max_active_mid_utterance() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 1, 5).unwrap();
        bc.update(0, 0.0, 50, 0, 100, false);
        assert!((bc.beam(0) - 10.0 * 0.8).abs() < 1e-5);
    }

    #[test]
    fn protects_final_frames_from_shrink() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 1, 5).unwrap();
        bc.set_beam(0, 7.0);
        // t + 5 >= final_t (final_t = 10, t = 6): over max_active but near
        // the end, non-online -> beam must not shrink.
        bc.update(0, 0.0, 50, 6, 10, false);
        assert_eq!(bc.beam(0), 7.0);
    }

    #[test]
    fn online_shrinks_even_near_a_chunk_boundary() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 1, 5).unwrap();
        bc.update(0, 0.0, 50, 6, 10, true);
        assert!((bc.beam(0) - 10.0 * 0.8).abs() < 1e-5);
    }

    #[test]
    fn last_real_frame_gets_infinite_beam_unless_online() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 1, 5).unwrap();
        bc.update(0, 3.0, 1, 9, 10, false);
        assert_eq!(bc.beam(0), f32::INFINITY);

        let mut bc_online = BeamController::new(1, 10.0, 8.0, 1, 5).unwrap();
        bc_online.update(0, 3.0, 1, 9, 10, true);
        assert_ne!(bc_online.beam(0), f32::INFINITY);
    }

    #[test]
    fn zero_active_counts_as_satisfying_min_active() {
        let mut bc = BeamController::new(1, 10.0, 8.0, 5, 20).unwrap();
        bc.set_beam(0, 50.0);
        bc.update(0, f32::NEG_INFINITY, 0, 0, 100, false);
        assert!((bc.beam(0) - (0.8 * 50.0 + 0.2 * 10.0)).abs() < 1e-5);
    }
}
