use promissory_core::UserId;

/// Acting identity for a request.
///
/// Taken from the `x-actor-id` header when present, otherwise generated per request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: UserId,
    supplied: bool,
}

impl ActorContext {
    pub fn supplied(actor: UserId) -> Self {
        Self { actor, supplied: true }
    }

    pub fn generated() -> Self {
        Self {
            actor: UserId::new(),
            supplied: false,
        }
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    /// Whether the caller named the actor explicitly.
    pub fn is_supplied(&self) -> bool {
        self.supplied
    }
}
