//! Async rendezvous primitives used by the engine

mod completer;

pub use completer::Completer;
