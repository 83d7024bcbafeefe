//! Shared test support for the workspace.
//!
//! - `contract`: the behavioural suite every `EntityStore` runs
//! - `stand_ins`: deterministic doubles for the resolver, generator,
//!   embedder, trace source and a store outage

pub mod contract;
pub mod stand_ins;

pub use stand_ins::{
    FixedVerdictResolver, InMemoryTraceSource, ScriptedGenerator, SearchOutageStore,
    StaticResolver, UnavailableEmbedder, UnavailableResolver,
};
