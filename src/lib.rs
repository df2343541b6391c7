use std::sync::Arc;
use std::time::Duration;

pub mod auth;
pub mod commands;
pub mod config;
pub mod contest;
pub mod grader;
pub mod models;
pub mod nav;
pub mod notify;
pub mod scapi;
pub mod session;
pub mod submission;

/// Everything a view needs from the outside world.
#[derive(Clone)]
pub struct Services {
    pub backend: Arc<dyn scapi::Backend>,
    pub grader: Arc<dyn grader::Grader>,
    pub navigator: nav::Navigator,
    pub notifier: notify::Notifier,
    pub poll_interval: Duration,
}
