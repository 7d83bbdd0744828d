use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use promissory_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, ValueObject};
use promissory_events::{Command, Event};

/// Stream/aggregate type tag stored with every promissory event.
pub const AGGREGATE_TYPE: &str = "promissory";

/// Promissory identifier (the stream identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromissoryId(pub AggregateId);

impl PromissoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PromissoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Lifecycle state of a promissory note.
///
/// Closed set; `code()` is the numeric form used by older clients.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromissoryState {
    Created,
    GuarantorAdded,
    Done,
}

impl PromissoryState {
    pub fn code(self) -> u8 {
        match self {
            PromissoryState::Created => 1,
            PromissoryState::GuarantorAdded => 2,
            PromissoryState::Done => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromissoryState::Created => "created",
            PromissoryState::GuarantorAdded => "guarantor_added",
            PromissoryState::Done => "done",
        }
    }
}

/// Aggregate root: Promissory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promissory {
    id: PromissoryId,
    code: String,
    state: PromissoryState,
    guarantors: Vec<GuarantorAdded>,
    version: u64,
    created: bool,
}

impl Promissory {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PromissoryId) -> Self {
        Self {
            id,
            code: String::new(),
            state: PromissoryState::Created,
            guarantors: Vec::new(),
            version: 0,
            created: false,
        }
    }

    /// External promissory code assigned at creation.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> PromissoryState {
        self.state
    }

    /// Guarantors in the order they were appended (duplicates kept).
    pub fn guarantors(&self) -> &[GuarantorAdded] {
        &self.guarantors
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Promissory {
    type Id = PromissoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePromissory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePromissory {
    pub promissory_id: PromissoryId,
    pub code: String,
    pub actor: UserId,
    pub row_version: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddGuarantor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddGuarantor {
    pub promissory_id: PromissoryId,
    pub guarantor_id: Uuid,
    pub national_id: String,
    pub name: String,
    pub family: String,
    pub actor: UserId,
    pub row_version: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDone {
    pub promissory_id: PromissoryId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromissoryCommand {
    CreatePromissory(CreatePromissory),
    AddGuarantor(AddGuarantor),
    MarkDone(MarkDone),
}

impl Command for PromissoryCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            PromissoryCommand::CreatePromissory(c) => c.promissory_id.0,
            PromissoryCommand::AddGuarantor(c) => c.promissory_id.0,
            PromissoryCommand::MarkDone(c) => c.promissory_id.0,
        }
    }
}

/// Event: PromissoryCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromissoryCreated {
    pub promissory_id: PromissoryId,
    pub code: String,
    pub state: PromissoryState,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub row_version: Uuid,
}

/// Sub-fact carried by `GuarantorCreated`: one guarantor added to the note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuarantorAdded {
    pub guarantor_id: Uuid,
    pub national_id: String,
    pub name: String,
    pub family: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub row_version: Uuid,
}

impl ValueObject for GuarantorAdded {}

/// Event: GuarantorCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuarantorCreated {
    pub promissory_id: PromissoryId,
    pub state: PromissoryState,
    pub guarantors: Vec<GuarantorAdded>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PromissoryDone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromissoryDone {
    pub promissory_id: PromissoryId,
    pub state: PromissoryState,
    pub completed_at: DateTime<Utc>,
    pub completed_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromissoryEvent {
    PromissoryCreated(PromissoryCreated),
    GuarantorCreated(GuarantorCreated),
    PromissoryDone(PromissoryDone),
}

impl PromissoryEvent {
    /// Stream the event belongs to.
    pub fn promissory_id(&self) -> PromissoryId {
        match self {
            PromissoryEvent::PromissoryCreated(e) => e.promissory_id,
            PromissoryEvent::GuarantorCreated(e) => e.promissory_id,
            PromissoryEvent::PromissoryDone(e) => e.promissory_id,
        }
    }
}

impl Event for PromissoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PromissoryEvent::PromissoryCreated(_) => "promissory.created",
            PromissoryEvent::GuarantorCreated(_) => "promissory.guarantor_created",
            PromissoryEvent::PromissoryDone(_) => "promissory.done",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PromissoryEvent::PromissoryCreated(e) => e.created_at,
            PromissoryEvent::GuarantorCreated(e) => e.occurred_at,
            PromissoryEvent::PromissoryDone(e) => e.completed_at,
        }
    }
}

impl Aggregate for Promissory {
    type Command = PromissoryCommand;
    type Event = PromissoryEvent;
    type Error = DomainError;

    fn apply(self, event: &Self::Event) -> Self {
        let next = match event {
            PromissoryEvent::PromissoryCreated(e) => Self {
                id: e.promissory_id,
                code: e.code.clone(),
                state: e.state,
                guarantors: Vec::new(),
                created: true,
                ..self
            },
            PromissoryEvent::GuarantorCreated(e) => {
                let mut guarantors = self.guarantors;
                guarantors.extend(e.guarantors.iter().cloned());
                Self { guarantors, ..self }
            }
            PromissoryEvent::PromissoryDone(e) => Self {
                state: e.state,
                ..self
            },
        };

        Self {
            version: next.version + 1,
            ..next
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PromissoryCommand::CreatePromissory(cmd) => self.handle_create(cmd),
            PromissoryCommand::AddGuarantor(cmd) => self.handle_add_guarantor(cmd),
            PromissoryCommand::MarkDone(cmd) => self.handle_mark_done(cmd),
        }
    }
}

impl Promissory {
    fn ensure_created(&self, promissory_id: PromissoryId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != promissory_id {
            return Err(DomainError::invariant("promissory_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePromissory) -> Result<Vec<PromissoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("promissory already exists"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        Ok(vec![PromissoryEvent::PromissoryCreated(PromissoryCreated {
            promissory_id: cmd.promissory_id,
            code: cmd.code.clone(),
            state: PromissoryState::Created,
            created_at: cmd.occurred_at,
            created_by: cmd.actor,
            row_version: cmd.row_version,
        })])
    }

    fn handle_add_guarantor(&self, cmd: &AddGuarantor) -> Result<Vec<PromissoryEvent>, DomainError> {
        self.ensure_created(cmd.promissory_id)?;

        for (field, value) in [
            ("national_id", &cmd.national_id),
            ("name", &cmd.name),
            ("family", &cmd.family),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{field} cannot be empty")));
            }
        }

        Ok(vec![PromissoryEvent::GuarantorCreated(GuarantorCreated {
            promissory_id: cmd.promissory_id,
            state: PromissoryState::GuarantorAdded,
            guarantors: vec![GuarantorAdded {
                guarantor_id: cmd.guarantor_id,
                national_id: cmd.national_id.clone(),
                name: cmd.name.clone(),
                family: cmd.family.clone(),
                created_at: cmd.occurred_at,
                created_by: cmd.actor,
                row_version: cmd.row_version,
            }],
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_done(&self, cmd: &MarkDone) -> Result<Vec<PromissoryEvent>, DomainError> {
        self.ensure_created(cmd.promissory_id)?;

        Ok(vec![PromissoryEvent::PromissoryDone(PromissoryDone {
            promissory_id: cmd.promissory_id,
            state: PromissoryState::Done,
            completed_at: cmd.occurred_at,
            completed_by: cmd.actor,
        })])
    }
}
