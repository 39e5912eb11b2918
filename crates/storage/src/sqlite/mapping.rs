use std::collections::BTreeSet;

use exam_core::model::{AnswerRecord, SessionId, StudentId, TestId};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn session_id_from_str(raw: &str) -> Result<SessionId, StorageError> {
    raw.parse().map_err(ser)
}

pub(crate) fn student_id_from_str(raw: String) -> Result<StudentId, StorageError> {
    StudentId::new(raw).map_err(ser)
}

pub(crate) fn test_id_from_str(raw: String) -> Result<TestId, StorageError> {
    TestId::new(raw).map_err(ser)
}

pub(crate) fn answers_to_json(answers: &AnswerRecord) -> Result<String, StorageError> {
    serde_json::to_string(answers).map_err(ser)
}

pub(crate) fn answers_from_json(raw: &str) -> Result<AnswerRecord, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn indices_to_json(indices: &BTreeSet<u32>) -> Result<String, StorageError> {
    serde_json::to_string(indices).map_err(ser)
}

pub(crate) fn indices_from_json(raw: &str) -> Result<BTreeSet<u32>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}
