// Copyright 2024 Nathan Hoos
//
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
mod atomic_wait;
mod environment;
mod handshake;
mod hashutil;

pub mod error;
pub mod ragged;
pub mod state_hash;

pub mod graph;
pub mod types;

mod arc_expander;
mod assembler;
mod backward;
mod beam;
mod forward;
mod frame_store;

pub mod engine;
pub mod online;

pub use crate::assembler::{Lattice, LatticeArc};
pub use crate::beam::BeamController;
pub use crate::engine::{intersect, IntersectOutput, IntersectParams};
pub use crate::error::{IntersectError, Result};
pub use crate::graph::{DenseScores, Graph, GraphArc};
pub use crate::online::{DecodeState, OnlineIntersector};
