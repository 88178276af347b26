//! Tax-law question answering.
//!
//! A question is routed to one of three workers:
//! - the self-correcting income tax graph ([`rag::RagGraph`])
//! - the concurrent real estate tax pipeline ([`real_estate::RealEstatePipeline`])
//! - general conversation ([`general::GeneralChat`])
//!
//! [`TaxAgent`] ties them together and exposes blocking and streaming turns.

pub mod agent;
pub mod general;
pub mod grading;
pub mod rag;
pub mod real_estate;
pub mod reasoner;
pub mod router;
pub mod state;
pub mod stream;

#[cfg(test)]
mod tests;

pub use agent::{AgentParts, TaxAgent, TurnOutcome};
pub use rag::{Node, RagGraph, RagOutcome};
pub use reasoner::{ModelTier, Reasoner};
pub use router::{Route, Router, Supervisor, SupervisorStep};
pub use state::ConversationState;
pub use stream::{CallTag, StreamEvent, TaggedToken, Terminal, TokenFilter};
