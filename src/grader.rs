use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{Language, SubmissionStatus, TestCase};

/// Probability that [`RandomGrader`] accepts a submission.
pub const ACCEPTANCE_PROBABILITY: f64 = 0.7;

pub const ACCEPTED_OUTPUT: &str = "All test cases passed!";
pub const WRONG_ANSWER_OUTPUT: &str = "Test case 1 failed: Expected output doesn't match";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub output: String,
}

impl Verdict {
    pub fn accepted() -> Self {
        Self { status: SubmissionStatus::Accepted, output: String::from(ACCEPTED_OUTPUT) }
    }

    pub fn wrong_answer() -> Self {
        Self { status: SubmissionStatus::WrongAnswer, output: String::from(WRONG_ANSWER_OUTPUT) }
    }

    /// Points earned for a problem worth `max_score`.
    pub fn score(&self, max_score: i64) -> i64 {
        if self.status.is_accepted() { max_score } else { 0 }
    }
}

/// Decides whether a piece of code solves a problem.
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, code: &str, language: Language, test_cases: &[TestCase]) -> Verdict;
}

/// Stand-in grader: nothing is executed, the verdict is a weighted coin flip.
pub struct RandomGrader {
    rng: Mutex<StdRng>,
    acceptance: f64,
}

impl RandomGrader {
    pub fn new() -> Self {
        Self::from_rng(StdRng::seed_from_u64(rand::random()))
    }

    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { rng: Mutex::new(rng), acceptance: ACCEPTANCE_PROBABILITY }
    }

    fn flip(&self) -> bool {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_bool(self.acceptance)
    }
}

impl Default for RandomGrader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Grader for RandomGrader {
    async fn grade(&self, _code: &str, language: Language, test_cases: &[TestCase]) -> Verdict {
        let verdict = if self.flip() { Verdict::accepted() } else { Verdict::wrong_answer() };
        log::trace!(
            "[RandomGrader::grade] {} submission against {} test cases: {}",
            language, test_cases.len(), verdict.status
        );
        verdict
    }
}
