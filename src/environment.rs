// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use once_cell::sync::Lazy;
use std::env;

/// Number of frames covered by one backward-pruning window.
///
/// # Environment Configuration
/// Set via `PRUNED_INTERSECT_PRUNE_WINDOW`.
///
/// # Default Behavior
/// - Default: 30 frames
/// - Thread-safe access via Lazy initialization
///
/// ```bash
/// export PRUNED_INTERSECT_PRUNE_WINDOW=[INTEGER]
/// ```
///
/// # Performance Implications
/// Larger windows mean the Backward worker runs less often but each run
/// walks more frames and the Forward worker can race further ahead before
/// blocking, at the cost of more frames resident in memory at once.
pub static PRUNE_NUM_FRAMES: Lazy<usize> = Lazy::new(|| {
    env::var("PRUNED_INTERSECT_PRUNE_WINDOW")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(30)
});

/// Stride, in frames, between the start of successive prune windows.
///
/// # Environment Configuration
/// Set via `PRUNED_INTERSECT_PRUNE_SHIFT`.
///
/// # Default Behavior
/// - Default: 20 frames
/// - Must be `<= PRUNE_NUM_FRAMES`, or unpruned frames would accumulate
///   between windows; the scheduler in `frame_store` clamps this.
///
/// ```bash
/// export PRUNED_INTERSECT_PRUNE_SHIFT=[INTEGER]
/// ```
pub static PRUNE_SHIFT: Lazy<usize> = Lazy::new(|| {
    env::var("PRUNED_INTERSECT_PRUNE_SHIFT")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(20)
});
