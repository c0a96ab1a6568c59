//! The resolved dependency graph and the builder that produces it.
pub mod builder;
pub mod dag;
pub mod failure;
pub mod node;

pub use builder::{build_graph, GraphBuilder, DEFAULT_MAX_DEPTH};
pub use dag::{DependencyGraph, RootResolution};
pub use failure::{RejectedCandidate, RejectionReason, ResolutionFailure};
pub use node::{DependencyNode, NodeId};
