use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::contest::Leaderboard;
use crate::grader::Grader;
use crate::models::{self, Language};
use crate::notify::{Notifier, Variant};
use crate::scapi::{self, Backend};
use crate::session::{self, SharedSession};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Please write some code before submitting")]
    Empty,

    #[error("You must be signed in to submit")]
    NotSignedIn,

    #[error("Submission already in progress")]
    InProgress,

    /// The backend refused the submission row; carries its raw message.
    #[error("{0}")]
    Persist(String),
}

/// Clears the in-flight flag however `record` returns.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Turns a submit action into a graded, persisted submission.
pub struct SubmissionRecorder {
    contest_id: String,
    backend: Arc<dyn Backend>,
    grader: Arc<dyn Grader>,
    session: SharedSession,
    notifier: Notifier,
    leaderboard: Arc<Leaderboard>,
    in_flight: AtomicBool,
}

impl SubmissionRecorder {
    pub fn new(
        contest_id: &str,
        backend: Arc<dyn Backend>,
        grader: Arc<dyn Grader>,
        session: SharedSession,
        notifier: Notifier,
        leaderboard: Arc<Leaderboard>,
    ) -> Self {
        Self {
            contest_id: contest_id.to_string(),
            backend,
            grader,
            session,
            notifier,
            leaderboard,
            in_flight: AtomicBool::new(false),
        }
    }

    fn reject(&self, err: SubmitError) -> SubmitError {
        self.notifier.error("Error", &err.to_string());
        err
    }

    /// Grades `code` for `problem`, stores the result and refreshes the
    /// leaderboard right away. Another submit is accepted as soon as the
    /// result is stored, even while that refresh is still pending.
    ///
    /// Missing problem, blank code, no signed-in user or a submission already
    /// underway are rejected without touching the backend.
    pub async fn record(
        &self,
        problem: Option<&models::Problem>,
        code: &str,
        language: Language,
    ) -> Result<models::Submission, SubmitError> {
        let Some(problem) = problem.filter(|_| !code.trim().is_empty()) else {
            return Err(self.reject(SubmitError::Empty));
        };

        let Some(user) = session::snapshot(&self.session) else {
            return Err(self.reject(SubmitError::NotSignedIn));
        };

        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(self.reject(SubmitError::InProgress));
        }
        let in_flight = InFlight(&self.in_flight);

        let verdict = self.grader.grade(code, language, &problem.test_cases).await;
        let submission = models::Submission {
            user_id: user.identity.id.clone(),
            contest_id: self.contest_id.clone(),
            problem_id: problem.id.clone(),
            code: code.to_string(),
            language,
            status: verdict.status,
            score: verdict.score(problem.score),
            output: verdict.output,
        };

        if let Err(err) = scapi::insert_submission(self.backend.as_ref(), &submission).await {
            log::error!("[record] Could not store submission for {}: {err}", problem.id);
            return Err(self.reject(SubmitError::Persist(err.message())));
        }
        // The row is stored; a slow leaderboard must not block the next submit.
        drop(in_flight);

        log::info!("{} submitted {} ({}): {} for {} points",
                   user.identity.id, problem.title, language, submission.status, submission.score);

        if submission.status.is_accepted() {
            let earned = format!("Great! You earned {} points!", submission.score);
            self.notifier.send("Accepted", &earned, Variant::Default);
        } else {
            self.notifier.send(&submission.status.to_string(), "Try again!", Variant::Destructive);
        }

        self.leaderboard.refresh().await;

        Ok(submission)
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}
