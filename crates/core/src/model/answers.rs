use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("question {index} is out of range (test has {count} questions)")]
    QuestionOutOfRange { index: u32, count: u32 },
}

fn check_index(index: u32, count: u32) -> Result<(), AnswerError> {
    if index >= count {
        return Err(AnswerError::QuestionOutOfRange { index, count });
    }
    Ok(())
}

//
// ─── ANSWER RECORD ─────────────────────────────────────────────────────────────
//

/// Selected option per question index. Unanswered questions are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerRecord(BTreeMap<u32, u32>);

impl AnswerRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `option` for `question`, replacing any previous choice.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionOutOfRange` if `question >= question_count`.
    pub fn select(
        &mut self,
        question: u32,
        option: u32,
        question_count: u32,
    ) -> Result<Option<u32>, AnswerError> {
        check_index(question, question_count)?;
        Ok(self.0.insert(question, option))
    }

    /// Remove the selection for `question`, returning it if there was one.
    pub fn clear(&mut self, question: u32) -> Option<u32> {
        self.0.remove(&question)
    }

    #[must_use]
    pub fn get(&self, question: u32) -> Option<u32> {
        self.0.get(&question).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().map(|(q, o)| (*q, *o))
    }

    /// Rehydrate from persisted storage, dropping nothing.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionOutOfRange` if any index is outside the test.
    pub fn from_persisted(
        answers: BTreeMap<u32, u32>,
        question_count: u32,
    ) -> Result<Self, AnswerError> {
        for question in answers.keys() {
            check_index(*question, question_count)?;
        }
        Ok(Self(answers))
    }

    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<u32, u32> {
        &self.0
    }
}

//
// ─── NAVIGATION ────────────────────────────────────────────────────────────────
//

/// Where the candidate is and where they have been.
///
/// `current_index` is always a member of `visited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    current_index: u32,
    visited: BTreeSet<u32>,
    marked_for_review: BTreeSet<u32>,
    question_count: u32,
}

impl NavigationState {
    /// Start at the first question.
    #[must_use]
    pub fn new(question_count: u32) -> Self {
        Self {
            current_index: 0,
            visited: BTreeSet::from([0]),
            marked_for_review: BTreeSet::new(),
            question_count,
        }
    }

    /// Rehydrate from a saved snapshot.
    ///
    /// The current question is added to `visited` if an older snapshot omitted it.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionOutOfRange` if any index is outside the test.
    pub fn from_persisted(
        current_index: u32,
        visited: BTreeSet<u32>,
        marked_for_review: BTreeSet<u32>,
        question_count: u32,
    ) -> Result<Self, AnswerError> {
        check_index(current_index, question_count)?;
        for index in visited.iter().chain(marked_for_review.iter()) {
            check_index(*index, question_count)?;
        }
        let mut state = Self {
            current_index,
            visited,
            marked_for_review,
            question_count,
        };
        state.visited.insert(current_index);
        Ok(state)
    }

    #[must_use]
    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    #[must_use]
    pub fn visited(&self) -> &BTreeSet<u32> {
        &self.visited
    }

    #[must_use]
    pub fn marked_for_review(&self) -> &BTreeSet<u32> {
        &self.marked_for_review
    }

    #[must_use]
    pub fn question_count(&self) -> u32 {
        self.question_count
    }

    /// Jump to `index`, marking it visited.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionOutOfRange` if `index` is outside the test.
    pub fn go_to(&mut self, index: u32) -> Result<(), AnswerError> {
        check_index(index, self.question_count)?;
        self.current_index = index;
        self.visited.insert(index);
        Ok(())
    }

    /// Advance one question. Returns `false` when already on the last question.
    pub fn next(&mut self) -> bool {
        let target = self.current_index + 1;
        if target >= self.question_count {
            return false;
        }
        self.current_index = target;
        self.visited.insert(target);
        true
    }

    /// Go back one question. Returns `false` when already on the first question.
    pub fn previous(&mut self) -> bool {
        let Some(target) = self.current_index.checked_sub(1) else {
            return false;
        };
        self.current_index = target;
        self.visited.insert(target);
        true
    }

    /// Flip the review mark on `index`; returns whether it is now marked.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::QuestionOutOfRange` if `index` is outside the test.
    pub fn toggle_review(&mut self, index: u32) -> Result<bool, AnswerError> {
        check_index(index, self.question_count)?;
        if self.marked_for_review.remove(&index) {
            Ok(false)
        } else {
            self.marked_for_review.insert(index);
            Ok(true)
        }
    }
}
