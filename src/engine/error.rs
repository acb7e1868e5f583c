use ulid::Ulid;

/// Temporal and business-rule violations of a single proposed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EndBeforeStart,
    PastStart,
    OutsideWorkHours,
    DurationTooShort { min_minutes: u32 },
    DurationTooLong { max_minutes: u32 },
    NotAnExtension,
    InvalidRecurrence(&'static str),
    InvalidResource(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    AlreadyCancelled(Ulid),
    AlreadyCompleted(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Validation(ValidationError),
    /// Carries the id of the confirmed booking in the way.
    Overlap(Ulid),
    ResourceNotFound(Ulid),
    BookingNotFound(Ulid),
    State(StateError),
    Forbidden(&'static str),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(v) => match v {
                ValidationError::EndBeforeStart => "end_before_start",
                ValidationError::PastStart => "past_start",
                ValidationError::OutsideWorkHours => "outside_work_hours",
                ValidationError::DurationTooShort { .. } => "duration_too_short",
                ValidationError::DurationTooLong { .. } => "duration_too_long",
                ValidationError::NotAnExtension => "not_an_extension",
                ValidationError::InvalidRecurrence(_) => "invalid_recurrence",
                ValidationError::InvalidResource(_) => "invalid_resource",
            },
            EngineError::Overlap(_) => "overlap",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::State(StateError::AlreadyCancelled(_)) => "already_cancelled",
            EngineError::State(StateError::AlreadyCompleted(_)) => "already_completed",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        EngineError::State(e)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EndBeforeStart => write!(f, "end time must be after start time"),
            ValidationError::PastStart => write!(f, "cannot book in the past"),
            ValidationError::OutsideWorkHours => {
                write!(f, "booking must fall within the resource's work hours")
            }
            ValidationError::DurationTooShort { min_minutes } => {
                write!(f, "minimum booking duration is {min_minutes} minutes")
            }
            ValidationError::DurationTooLong { max_minutes } => {
                write!(f, "maximum booking duration is {max_minutes} minutes")
            }
            ValidationError::NotAnExtension => {
                write!(f, "new end time must be later than the current end time")
            }
            ValidationError::InvalidRecurrence(msg) => write!(f, "invalid recurrence: {msg}"),
            ValidationError::InvalidResource(msg) => write!(f, "invalid resource: {msg}"),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(v) => write!(f, "{v}"),
            EngineError::Overlap(id) => write!(f, "time slot already booked by {id}"),
            EngineError::ResourceNotFound(id) => write!(f, "resource not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::State(StateError::AlreadyCancelled(id)) => {
                write!(f, "booking {id} is already cancelled")
            }
            EngineError::State(StateError::AlreadyCompleted(id)) => {
                write!(f, "booking {id} is already completed")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
