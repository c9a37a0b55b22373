//! # Kernel fusion legality
//!
//! Decides whether two fusion-candidate kernels may be merged into one, and if so,
//! how their loop axes line up.
//!
//! ## Overview
//!
//! - [`FusionGraph`] - DAG of candidate kernels, each owning a [`Subgraph`]
//! - [`analyze`] - shared-input and producer/consumer links between two kernels
//! - [`back_step`] / [`apply_view`] - broadcast, transpose and slice views across a
//!   load/store boundary
//! - [`AxisSolver`] - builds the axis renaming for both kernels
//! - [`StrategyRegistry`] - per-category legality policies, combined with AND
//! - [`FusionDecider`] - runs all of the above and returns a [`FusionPlan`]
//!
//! Nothing here mutates the graph. The caller applies an approved [`FusionPlan`].

#[macro_export]
macro_rules! rvec {
    ($($x:tt)*) => {
        smallvec::smallvec![$($x)*]
    };
}

mod axis;
mod axis_map;
mod config;
mod connectivity;
mod decision;
mod dtype;
mod error;
mod expr;
mod graph;
mod op;
mod solver;
pub mod strategy;
mod subgraph;
mod tensor_desc;
mod view;

pub use axis::*;
pub use axis_map::*;
pub use config::*;
pub use connectivity::*;
pub use decision::*;
pub use dtype::*;
pub use error::*;
pub use expr::*;
pub use graph::*;
pub use op::*;
pub use solver::*;
pub use strategy::{
    FuseCap, FusePair, FusionPriority, FusionStrategy, StrategyRegistry, StrategySet,
};
pub use subgraph::*;
pub use tensor_desc::*;
pub use view::*;

pub type RVec<T> = smallvec::SmallVec<[T; 4]>;
pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;
