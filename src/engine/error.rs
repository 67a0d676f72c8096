use crate::model::DateSpan;

/// How callers should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    BadRequest,
    StoreFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("billboard {billboard_id} is not available for {span}: booked by campaign {blocking_campaign}")]
    Conflict {
        billboard_id: String,
        span: DateSpan,
        blocking_campaign: String,
    },

    #[error("billboard {billboard_id} is already linked to campaign {campaign_id}")]
    AlreadyLinked {
        campaign_id: String,
        billboard_id: String,
    },

    #[error("location {0} still has billboards")]
    HasBillboards(String),

    #[error("billboard {0} still has campaign bookings")]
    HasBookings(String),

    #[error("exactly one of campaign_id or start_date/end_date must be given")]
    AmbiguousAvailabilityQuery,

    #[error("invalid date range: {start} is after {end}")]
    ReversedSpan {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Conflict { .. }
            | EngineError::AlreadyLinked { .. }
            | EngineError::HasBillboards(_)
            | EngineError::HasBookings(_) => ErrorKind::Conflict,
            EngineError::AmbiguousAvailabilityQuery
            | EngineError::ReversedSpan { .. }
            | EngineError::InvalidField { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::BadRequest,
            EngineError::WalError(_) => ErrorKind::StoreFailure,
        }
    }
}
