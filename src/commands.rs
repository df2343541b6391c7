use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use regex::Regex;
use tokio::task::JoinHandle;

use crate::Services;
use crate::auth::{AuthFlow, AuthTab};
use crate::config::Config;
use crate::contest::ContestView;
use crate::models::{self, Language, Route};
use crate::session;

const MAX_CMD_LENGTH: usize = 12;

static COMMAND_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("command pattern is a valid regex")
});

/// Terminal front-end: owns whichever view the current route shows.
pub struct App {
    services: Services,
    config: Config,
    auth: AuthFlow,
    contest: Option<ContestView>,
    landing: Option<JoinHandle<()>>,
}

struct CommandInstance<'a> {
    app: &'a mut App,
    parameters: &'a [&'a str],
}

impl App {
    pub fn new(services: Services, config: Config) -> Self {
        let auth = AuthFlow::new(
            Arc::clone(&services.backend),
            services.navigator.clone(),
            services.notifier.clone(),
        );

        Self { services, config, auth, contest: None, landing: None }
    }

    pub fn route(&self) -> Route {
        self.services.navigator.current()
    }

    pub fn call_token(&self) -> char {
        self.config.call_token
    }

    /// Brings the mounted views in line with the current route.
    ///
    /// Mounting can itself redirect, so this repeats until the route settles.
    pub async fn sync_route(&mut self) -> Option<String> {
        let mut banner = None;
        loop {
            let route = self.route();

            if let Some(landing) = self.landing.take() {
                landing.abort();
            }
            if let Some(view) = self.contest.take_if(|view| route != Route::Contest(view.contest_id().to_string())) {
                view.unmount();
            }

            match &route {
                Route::Home => {
                    let (navigated, landing) = session::land(
                        Arc::clone(&self.services.backend),
                        self.services.navigator.clone(),
                        self.config.default_contest.clone(),
                    )
                    .await;
                    self.landing = landing;
                    if !navigated {
                        banner = Some(self.render_home());
                    }
                }
                Route::Auth => banner = Some(self.render_auth()),
                Route::Contest(contest_id) => {
                    if self.contest.is_none() {
                        self.contest = ContestView::mount(contest_id, self.services.clone()).await;
                        banner = self.contest.as_ref().map(render_contest);
                    }
                }
            }

            if self.route() == route {
                return banner;
            }
        }
    }

    /// Runs one line of input. Lines without the call token are ignored.
    pub async fn run_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        let token = self.call_token();
        if !line.starts_with(token) || line.len() <= token.len_utf8() {
            return None;
        }

        let output = self.run_command(&line[token.len_utf8()..])
            .await
            .unwrap_or_else(|err| format!("Error: {err}"));

        let banner = self.sync_route().await;
        let output = [Some(output), banner]
            .into_iter()
            .flatten()
            .filter(|text| !text.is_empty())
            .join("\n");

        Some(output)
    }

    async fn run_command(&mut self, input: &str) -> Result<String> {
        // Split the input (on whitespace) into:
        // - The command (first token)
        // - Its parameters (all tokens afterwards)
        let split_tokens = input.split_whitespace().collect::<Vec<_>>();
        let Some((&command, parameters)) = split_tokens.split_first() else {
            return Err(anyhow!("Invalid command syntax."));
        };

        let mut cmd = CommandInstance { app: self, parameters };

        let result: String = match command {
                 "help" => cmd.app.get_help(),
               "signin" => cmd.sign_in().await?,
               "signup" => cmd.sign_up().await?,
                  "tab" => cmd.tab()?,
             "problems" => cmd.problems()?,
               "select" => cmd.select()?,
              "problem" => cmd.problem()?,
                 "lang" => cmd.lang()?,
                 "load" => cmd.load().await?,
                 "code" => cmd.code()?,
               "submit" => cmd.submit().await?,
          "leaderboard" => cmd.leaderboard().await?,
              "signout" => cmd.sign_out().await?,
            _ => {
                if Self::is_valid_cmd(command) {
                    log::info!("User submitted unknown command: {}", command);
                    return Err(anyhow!(
                        "No such command found: {}, see {}help for commands.",
                        command, self.call_token()
                    ));
                } else {
                    log::info!("User submitted invalid command: {}", command);
                    return Err(anyhow!("Invalid command syntax."));
                }
            }
        };

        Ok(result)
    }

    /// Ensures that the string slice conforms to C-like identifier regex
    fn is_valid_cmd(s: &str) -> bool {
        s.len() <= MAX_CMD_LENGTH && COMMAND_REGEX.is_match(s)
    }

    /// Gets a help string. Should be updated after a new command is added
    pub fn get_help(&self) -> String {
        let t = self.call_token();
        format!(
            r#"
**Command List:**
`{t}signin <email> <password>`:  Sign in to an existing account.
`{t}signup <username> <email> <password>`:  Create an account (password: min. 6 characters).
`{t}tab <signin|signup>`:  Switch between the sign-in and sign-up forms.
`{t}problems`:  List the contest's problems.
`{t}select <number|id>`:  Make a problem the active one.
`{t}problem`:  Show the active problem and its test cases.
`{t}lang [javascript|python|cpp]`:  Show or change the submission language.
`{t}load <path>`:  Load a source file into the editor.
`{t}code`:  Show the editor contents.
`{t}submit`:  Submit the editor contents for the active problem.
`{t}leaderboard`:  Refresh and show the contest leaderboard.
`{t}signout`:  Sign out.
`{t}help`:  Get information on supported commands
"#,
        )
    }

    fn render_home(&self) -> String {
        format!(
            "**Shodh-a-Code**\n\
             Join the ultimate coding contest platform. Solve problems, compete with others, \
             and climb the leaderboard!\n\
             Use `{t}signin` or `{t}signup` to get started.",
            t = self.call_token()
        )
    }

    fn render_auth(&self) -> String {
        let tab = match self.auth.tab() {
            AuthTab::SignIn => "Sign In",
            AuthTab::SignUp => "Sign Up",
        };
        format!("**Shodh-a-Code** ({tab})\nJoin the coding contest platform")
    }
}

fn render_contest(view: &ContestView) -> String {
    let mut output = String::from("**Shodh-a-Code**");
    if let Some(username) = view.session().as_ref().and_then(|s| s.username().map(str::to_string)) {
        output += &format!("\nWelcome, {username}");
    }
    output += "\n";
    output += &render_problems(&view.problems(), view.selected_problem().as_ref());
    output += "\n";
    output += &render_leaderboard(&view.leaderboard());
    output
}

fn render_problems(problems: &[models::Problem], selected: Option<&models::Problem>) -> String {
    if problems.is_empty() {
        return String::from("**Problems:**\n\tNo problems in this contest.");
    }

    let mut lines = problems.iter().enumerate().map(|(index, problem)| {
        let marker = if selected.is_some_and(|s| s.id == problem.id) { ">" } else { " " };
        format!("{marker} {}. {} ({}pts)", index + 1, problem.title, problem.score)
    });

    format!("**Problems:**\n{}", lines.join("\n"))
}

fn render_leaderboard(entries: &[models::LeaderboardEntry]) -> String {
    if entries.is_empty() {
        return String::from("**Leaderboard:**\n\tNo submissions yet. Be the first!");
    }

    let mut lines = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| format!("#{:<3} {entry}", index + 1));

    format!("**Leaderboard:**\n{}", lines.join("\n"))
}

impl CommandInstance<'_> {
    fn contest(&self) -> Result<&ContestView> {
        self.app
            .contest
            .as_ref()
            .context("Open a contest first (sign in to be taken to one).")
    }

    fn require_params(&self, count: usize, usage: &str) -> Result<()> {
        if self.parameters.len() < count {
            return Err(anyhow!("Expected usage: `{}{usage}`", self.app.call_token()));
        }
        Ok(())
    }

    async fn sign_in(&mut self) -> Result<String> {
        self.require_params(2, "signin <email> <password>")?;
        let (email, password) = (self.parameters[0], self.parameters[1]);

        // Outcome is reported through notifications.
        let _ = self.app.auth.submit_sign_in(email, password).await;
        Ok(String::new())
    }

    async fn sign_up(&mut self) -> Result<String> {
        self.require_params(3, "signup <username> <email> <password>")?;
        let (username, email, password) = (self.parameters[0], self.parameters[1], self.parameters[2]);

        self.app.auth.set_tab(AuthTab::SignUp);
        self.app.auth.set_username(username);
        let _ = self.app.auth.submit_sign_up(email, password).await;
        Ok(String::new())
    }

    fn tab(&mut self) -> Result<String> {
        let tab = match self.parameters.first().copied() {
            Some("signin") => AuthTab::SignIn,
            Some("signup") => AuthTab::SignUp,
            _ => return Err(anyhow!("Expected usage: `{}tab <signin|signup>`", self.app.call_token())),
        };
        self.app.auth.set_tab(tab);
        Ok(self.app.render_auth())
    }

    fn problems(&self) -> Result<String> {
        let view = self.contest()?;
        Ok(render_problems(&view.problems(), view.selected_problem().as_ref()))
    }

    fn select(&self) -> Result<String> {
        self.require_params(1, "select <number|id>")?;
        let view = self.contest()?;
        let choice = self.parameters[0];

        let selected = match choice.parse::<usize>() {
            Ok(number) if number >= 1 => view.select_problem(number - 1),
            _ => view.select_problem_by_id(choice),
        };

        if !selected {
            return Err(anyhow!("No such problem: {choice}"));
        }

        let problem = view.selected_problem().context("Selection vanished")?;
        Ok(problem.to_string())
    }

    fn problem(&self) -> Result<String> {
        let view = self.contest()?;
        Ok(view
            .selected_problem()
            .map(|problem| problem.to_string())
            .unwrap_or_else(|| String::from("No problem selected.")))
    }

    fn lang(&self) -> Result<String> {
        let view = self.contest()?;
        if let Some(tag) = self.parameters.first() {
            let language = tag.parse::<Language>().map_err(|err| anyhow!(err))?;
            view.set_language(language);
        }

        let choices = Language::ALL.iter().map(|language| language.tag()).join(", ");
        Ok(format!("Language: {} (available: {choices})", view.language()))
    }

    async fn load(&self) -> Result<String> {
        self.require_params(1, "load <path>")?;
        let path = self.parameters.join(" ");
        let view = self.contest()?;

        let code = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("No such file or directory: {path}"))?;

        view.set_code(&code);
        Ok(format!("Loaded {} lines from {path}.", code.lines().count()))
    }

    fn code(&self) -> Result<String> {
        let view = self.contest()?;
        let code = view.code();
        if code.is_empty() {
            return Ok(String::from("Editor is empty."));
        }
        Ok(format!("```{}\n{code}\n```", view.language().tag()))
    }

    async fn submit(&self) -> Result<String> {
        let view = self.contest()?;
        // Verdict and errors are reported through notifications.
        let _ = view.submit().await;
        Ok(render_leaderboard(&view.leaderboard()))
    }

    async fn leaderboard(&self) -> Result<String> {
        let view = self.contest()?;
        view.refresh_leaderboard().await;
        Ok(render_leaderboard(&view.leaderboard()))
    }

    async fn sign_out(&self) -> Result<String> {
        match &self.app.contest {
            Some(view) => view.sign_out().await,
            None => {
                self.app.services.backend.sign_out().await?;
                self.app.services.navigator.navigate(Route::Auth);
            }
        }
        Ok(String::new())
    }
}
