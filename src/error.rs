use thiserror::Error;

use crate::types::Mode;

/// Failures surfaced to the caller of the router.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Missing input: {0}")]
    MissingInput(String),
    #[error("Address not found: {0}")]
    AddressNotFound(String),
    #[error("Upstream service error: {0}")]
    Upstream(String),
    #[error("No {0} ways available to build a graph")]
    EmptyGraph(Mode),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed call to the transit planner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    #[error("planner request timed out")]
    Timeout,
    #[error("planner returned server error {0}")]
    ServerError(u16),
    #[error("planner unreachable: {0}")]
    Unreachable(String),
    #[error("planner rejected the request with status {0}")]
    Rejected(u16),
    #[error("planner response could not be decoded: {0}")]
    Decode(String),
}

impl PlannerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlannerError::Timeout | PlannerError::ServerError(_))
    }
}

impl From<reqwest::Error> for PlannerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlannerError::Timeout
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                PlannerError::ServerError(status.as_u16())
            } else {
                PlannerError::Rejected(status.as_u16())
            }
        } else if err.is_decode() {
            PlannerError::Decode(err.to_string())
        } else {
            PlannerError::Unreachable(err.to_string())
        }
    }
}

/// Reasons a planner response cannot be used as an itinerary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItineraryError {
    #[error("planner reported an error: {0}")]
    Planner(String),
    #[error("planner returned no itinerary")]
    Empty,
    #[error("itinerary has no duration")]
    MissingDuration,
    #[error("itinerary has no legs")]
    MissingLegs,
}

pub type Result<T> = std::result::Result<T, Error>;

#[test]
fn test_retryable_classification() {
    assert!(PlannerError::Timeout.is_retryable());
    assert!(PlannerError::ServerError(503).is_retryable());
    assert!(!PlannerError::Unreachable("dns".to_string()).is_retryable());
    assert!(!PlannerError::Rejected(400).is_retryable());
    assert!(!PlannerError::Decode("eof".to_string()).is_retryable());
}
