use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contest the landing page sends signed-in users to.
pub const DEFAULT_CONTEST_ID: &str = "00000000-0000-0000-0000-000000000001";

/// An authenticated account, as reported by the backend's auth service.
///
/// The front-end only ever holds a transient copy of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) at which `access_token` stops being accepted.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: Identity,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now().timestamp())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "expectedOutput")]
    pub expected_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub contest_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    pub score: i64,
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "**{}** ({}pts)\n{}\n", self.title, self.score, self.description)?;
        write!(f, "Test Cases:")?;
        for test_case in &self.test_cases {
            write!(
                f,
                "\n\tInput:    {}\n\
                 \tExpected: {}",
                test_case.input, test_case.expected_output
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    JavaScript,
    Python,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::JavaScript, Language::Python, Language::Cpp];

    pub fn tag(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Cpp => "cpp",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::JavaScript => "JavaScript",
            Language::Python => "Python",
            Language::Cpp => "C++",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|language| language.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown language: {s}"))
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
}

impl SubmissionStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Accepted => f.write_str("Accepted"),
            SubmissionStatus::WrongAnswer => f.write_str("Wrong Answer"),
        }
    }
}

/// A single recorded attempt. Written once, never read back individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    pub contest_id: String,
    pub problem_id: String,
    pub code: String,
    pub language: Language,
    pub status: SubmissionStatus,
    pub score: i64,
    pub output: String,
}

impl std::fmt::Display for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "**Submission**: {}\n\
            \tStatus:   *{}*\n\
            \tScore:    {}\n\
            \tLanguage: `{}`\n\
            \tOutput:   {}",
            self.problem_id, self.status, self.score, self.language, self.output
        )
    }
}

/// One row of the server-computed contest ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    /// `None` for accounts whose profile row was never created.
    #[serde(default)]
    pub username: Option<String>,
    pub total_score: i64,
}

impl LeaderboardEntry {
    /// Name to render: the username, or an abbreviated user id when there is none.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => username.clone(),
            _ => format!("user-{}", self.user_id.chars().take(8).collect::<String>()),
        }
    }
}

impl std::fmt::Display for LeaderboardEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<24} {}", self.display_name(), self.total_score)
    }
}

/// Where the front-end currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Auth,
    Contest(String),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Home => f.write_str("/"),
            Route::Auth => f.write_str("/auth"),
            Route::Contest(contest_id) => write!(f, "/contest/{contest_id}"),
        }
    }
}
