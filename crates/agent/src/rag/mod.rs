//! Self-correcting retrieval-augmented answer graph.

pub mod graph;
mod nodes;

pub use graph::{Node, RagGraph, RagOutcome, Recovery};
