mod answers;
mod ids;
mod progress;
mod session;
mod violation;

pub use ids::{ParseIdError, SessionId, StudentId, TestId};

pub use answers::{AnswerError, AnswerRecord, NavigationState};
pub use progress::{
    ExamProgress, ProgressSnapshot, SaveProgressPayload, SubmissionReason, SubmissionReceipt,
    SubmitPayload,
};
pub use session::{ExamSession, ExamSessionDraft, ExamSessionError, SessionMeta, SessionStatus};
pub use violation::{
    Severity, ViolationCategory, ViolationDetail, ViolationEvent, ViolationSnapshot,
};
