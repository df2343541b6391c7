use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::Services;
use crate::models::{self, Language, Route};
use crate::scapi::{self, Backend};
use crate::session::{self, SessionContext, SessionGuard, SharedSession};
use crate::submission::{SubmissionRecorder, SubmitError};

/// How often the leaderboard is re-fetched while a contest is on screen.
pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: Vec<models::LeaderboardEntry>,
    /// Ticket of the response currently on display.
    applied: u64,
}

/// Latest known ranking of a contest.
///
/// Every refresh draws a ticket before its request goes out; a response only
/// replaces the snapshot if no newer request has already been applied.
pub struct Leaderboard {
    backend: Arc<dyn Backend>,
    contest_id: String,
    tickets: AtomicU64,
    snapshot: Mutex<Snapshot>,
}

impl Leaderboard {
    pub fn new(backend: Arc<dyn Backend>, contest_id: &str) -> Self {
        Self {
            backend,
            contest_id: contest_id.to_string(),
            tickets: AtomicU64::new(0),
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    /// Re-fetches the ranking. Returns whether the snapshot was replaced.
    ///
    /// Failures keep the previous snapshot; the next poll tries again.
    pub async fn refresh(&self) -> bool {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;

        match scapi::fetch_leaderboard(self.backend.as_ref(), &self.contest_id).await {
            Ok(entries) => {
                let mut snapshot = lock(&self.snapshot);
                if ticket < snapshot.applied {
                    log::debug!("[Leaderboard::refresh] Dropping stale response #{ticket} (showing #{})",
                                snapshot.applied);
                    return false;
                }
                snapshot.applied = ticket;
                snapshot.entries = entries;
                true
            }
            Err(err) => {
                log::warn!("[Leaderboard::refresh] Could not fetch leaderboard for {}: {err}",
                           self.contest_id);
                false
            }
        }
    }

    pub fn entries(&self) -> Vec<models::LeaderboardEntry> {
        lock(&self.snapshot).entries.clone()
    }

    /// Points of `user_id`, if they are ranked.
    pub fn score_of(&self, user_id: &str) -> Option<i64> {
        lock(&self.snapshot)
            .entries
            .iter()
            .find(|entry| entry.user_id == user_id)
            .map(|entry| entry.total_score)
    }
}

/// Re-fetches `leaderboard` every `period` until aborted.
///
/// Ticks never wait on each other: each one fires its own request.
fn spawn_poller(leaderboard: Arc<Leaderboard>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            log::trace!("[poller] Leaderboard tick for {}", leaderboard.contest_id);
            let leaderboard = Arc::clone(&leaderboard);
            tokio::spawn(async move {
                leaderboard.refresh().await;
            });
        }
    })
}

#[derive(Debug, Default)]
struct Editor {
    problems: Vec<models::Problem>,
    selected: Option<usize>,
    code: String,
    language: Language,
}

/// A mounted contest page: problems, editor, and a live leaderboard.
///
/// Background work stops when the view is dropped or unmounted.
pub struct ContestView {
    contest_id: String,
    services: Services,
    session: SharedSession,
    editor: Mutex<Editor>,
    leaderboard: Arc<Leaderboard>,
    recorder: SubmissionRecorder,
    tasks: Vec<JoinHandle<()>>,
}

impl ContestView {
    /// Opens `contest_id` for the signed-in user.
    ///
    /// Returns `None` after redirecting to the auth route when nobody is
    /// signed in; nothing about the contest is requested in that case.
    pub async fn mount(contest_id: &str, services: Services) -> Option<Self> {
        log::trace!("[ContestView::mount] Mounting contest {contest_id}...");
        let guard = SessionGuard::new(Arc::clone(&services.backend), services.navigator.clone());
        let watcher = guard.watch();

        if guard.activate().await.is_none() {
            watcher.abort();
            return None;
        }

        let leaderboard = Arc::new(Leaderboard::new(Arc::clone(&services.backend), contest_id));
        let recorder = SubmissionRecorder::new(
            contest_id,
            Arc::clone(&services.backend),
            Arc::clone(&services.grader),
            guard.context(),
            services.notifier.clone(),
            Arc::clone(&leaderboard),
        );

        let mut view = Self {
            contest_id: contest_id.to_string(),
            session: guard.context(),
            editor: Mutex::new(Editor::default()),
            leaderboard,
            recorder,
            tasks: vec![watcher],
            services,
        };

        view.load_problems().await;
        view.leaderboard.refresh().await;
        view.tasks.push(spawn_poller(Arc::clone(&view.leaderboard), view.services.poll_interval));

        log::info!("Contest {contest_id} mounted.");
        Some(view)
    }

    /// Loads the contest's problems; failures leave the list empty.
    pub async fn load_problems(&self) {
        match scapi::fetch_problems(self.services.backend.as_ref(), &self.contest_id).await {
            Ok(problems) => {
                log::trace!("[load_problems] {} problems in {}", problems.len(), self.contest_id);
                let mut editor = lock(&self.editor);
                if editor.selected.is_none() && !problems.is_empty() {
                    editor.selected = Some(0);
                }
                editor.problems = problems;
            }
            Err(err) => {
                log::warn!("[load_problems] {err}");
                self.services.notifier.error("Error", "Failed to load problems");
            }
        }
    }

    pub fn contest_id(&self) -> &str {
        &self.contest_id
    }

    /// Who is signed in, as currently known to the view.
    pub fn session(&self) -> Option<SessionContext> {
        session::snapshot(&self.session)
    }

    pub fn problems(&self) -> Vec<models::Problem> {
        lock(&self.editor).problems.clone()
    }

    pub fn selected_problem(&self) -> Option<models::Problem> {
        let editor = lock(&self.editor);
        editor.selected.and_then(|index| editor.problems.get(index).cloned())
    }

    /// Selects the problem at `index` (zero-based). Returns whether it exists.
    pub fn select_problem(&self, index: usize) -> bool {
        let mut editor = lock(&self.editor);
        if index >= editor.problems.len() {
            return false;
        }
        editor.selected = Some(index);
        true
    }

    pub fn select_problem_by_id(&self, problem_id: &str) -> bool {
        let mut editor = lock(&self.editor);
        match editor.problems.iter().position(|problem| problem.id == problem_id) {
            Some(index) => {
                editor.selected = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn language(&self) -> Language {
        lock(&self.editor).language
    }

    pub fn set_language(&self, language: Language) {
        lock(&self.editor).language = language;
    }

    pub fn code(&self) -> String {
        lock(&self.editor).code.clone()
    }

    pub fn set_code(&self, code: &str) {
        lock(&self.editor).code = code.to_string();
    }

    pub fn leaderboard(&self) -> Vec<models::LeaderboardEntry> {
        self.leaderboard.entries()
    }

    pub async fn refresh_leaderboard(&self) -> bool {
        self.leaderboard.refresh().await
    }

    /// Grades and records the editor's code against the selected problem.
    pub async fn submit(&self) -> Result<models::Submission, SubmitError> {
        let (problem, code, language) = {
            let editor = lock(&self.editor);
            let problem = editor.selected.and_then(|index| editor.problems.get(index).cloned());
            (problem, editor.code.clone(), editor.language)
        };

        self.recorder.record(problem.as_ref(), &code, language).await
    }

    /// Signs out and leaves the contest.
    pub async fn sign_out(&self) {
        if let Err(err) = self.services.backend.sign_out().await {
            log::error!("[sign_out] {err}");
        }
        self.services.navigator.navigate(Route::Auth);
    }

    /// Stops the poller and the auth watcher.
    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Leaves the contest. Dropping the view has the same effect, minus the log line.
    pub fn unmount(mut self) {
        self.stop_tasks();
        log::info!("Contest {} unmounted.", self.contest_id);
    }
}

impl Drop for ContestView {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
