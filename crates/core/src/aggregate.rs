//! Aggregate root trait for event-sourced domain models.

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of events folded into this state (the stream revision it mirrors).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a stream append.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet (starting a new stream).
    NoStream,
    /// The stream must exist and be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Compare against the current stream version (`0` for a stream that does not exist).
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State evolution**: `apply(self, event)` consumes the previous state and returns
///   the next one. A snapshot handed out earlier is never mutated in place.
///
/// Aggregates must not perform IO, logging or other side effects.
pub trait Aggregate: AggregateRoot + Sized {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve state by one event: `state' = apply(state, event)`.
    ///
    /// Implementations must be total over every event variant and should bump
    /// `version()` by exactly one.
    fn apply(self, event: &Self::Event) -> Self;

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Fold an ordered event sequence into an aggregate, starting from `initial`.
pub fn fold<'a, A>(initial: A, events: impl IntoIterator<Item = &'a A::Event>) -> A
where
    A: Aggregate,
    A::Event: 'a,
{
    events.into_iter().fold(initial, |state, event| state.apply(event))
}
