use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use shodh::*;
use shodh::commands::App;
use shodh::config::Config;
use shodh::grader::RandomGrader;
use shodh::models::Route;
use shodh::nav::Navigator;
use shodh::notify::Notifier;
use shodh::scapi::HostedBackend;

async fn say(text: &str) {
    let mut stdout = tokio::io::stdout();
    if let Err(why) = stdout.write_all(format!("{text}\n").as_bytes()).await {
        log::error!("Error writing output: {why:?}");
    }
    let _ = stdout.flush().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    // Begin logger
    env_logger::init();

    // Load backend endpoint and keys
    let config = Config::load()?;

    let backend = HostedBackend::new(&config.backend_url, &config.backend_key)
        .context("Error creating backend client.")?;

    let (navigator, mut route) = Navigator::new(Route::Home);
    let (notifier, mut feed) = Notifier::channel();

    // Toasts are printed as they arrive, independent of command output
    tokio::spawn(async move {
        while let Some(notification) = feed.recv().await {
            say(&notification.to_string()).await;
        }
    });

    let services = Services {
        backend: Arc::new(backend),
        grader: Arc::new(RandomGrader::new()),
        navigator,
        notifier,
        poll_interval: config.poll_interval,
    };

    let token = config.call_token;
    let mut app = App::new(services, config);
    if let Some(banner) = app.sync_route().await {
        say(&banner).await;
    }
    say(&format!("Type `{token}help` for commands, `{token}quit` to leave.")).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Error reading input.")? else {
                    break;
                };
                if line.trim() == format!("{token}quit") {
                    break;
                }
                if let Some(response) = app.run_line(&line).await {
                    say(&response).await;
                }
                // run_line already followed any redirect it caused
                route.borrow_and_update();
            }
            // Redirects that happen in the background (sign-in elsewhere, expired session)
            changed = route.changed() => {
                if changed.is_err() {
                    break;
                }
                route.borrow_and_update();
                if let Some(banner) = app.sync_route().await {
                    say(&banner).await;
                }
            }
        }
    }

    log::info!("Shutting down.");
    Ok(())
}
