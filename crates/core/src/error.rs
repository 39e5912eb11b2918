use thiserror::Error;

use crate::model::{AnswerError, ExamSessionError, ParseIdError};
use crate::settings::SettingsError;

/// Umbrella error for domain-level validation failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Session(#[from] ExamSessionError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
