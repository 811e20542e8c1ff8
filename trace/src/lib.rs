//! Record the ordered events, scheduling choices, and abstract states of a fuzzed execution.
//!
//! An execution of the system under test is observed from three angles:
//!
//! * [EventTrace]: the global interleaving of [Event]s as seen by the interception layer.
//! * [Trace]: the scheduling [Choice]s the fuzzer made to produce that interleaving.
//! * [Path]: the sequence of abstract [TlcState]s the oracle derived from the event trace.
//!
//! # Status
//!
//! `modelfuzz-trace` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

mod event;
pub use event::{Event, EventTrace, Params};
mod schedule;
pub use schedule::{Choice, Trace};
mod state;
pub use state::{canonicalize, canonicalize_all, Path, Paths, TlcState};
