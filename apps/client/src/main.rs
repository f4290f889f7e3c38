mod api;
mod auth;
mod config;
mod jobs;

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::ApiClient;
use crate::auth::callback::{CallbackHandler, CallbackOutcome, CallbackParams, SUCCESS_REDIRECT_DELAY};
use crate::auth::provider::{AuthIntent, CognitoClient, ProviderConfig};
use crate::auth::session::{AuthGate, SessionManager};
use crate::auth::store::FileTokenStore;
use crate::config::Config;
use crate::jobs::client::{GenerateRequest, HttpJobsApi, JobsApi};
use crate::jobs::poller::{JobHandle, JobPoller, JobState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_directive(&config.rust_log))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ResumeAI client v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(FileTokenStore::new(config.token_file.clone()));
    let provider = Arc::new(CognitoClient::new(
        &config.cognito_domain,
        ProviderConfig {
            client_id: config.cognito_client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
        },
    )?);
    let session = Arc::new(SessionManager::new(store, provider.clone()));

    // Resolve the persisted session before anything renders.
    session.initialize().await;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("login") => {
            let intent = if args.iter().any(|a| a == "--signup") {
                AuthIntent::SignUp
            } else {
                AuthIntent::SignIn
            };
            run_login(&session, provider, intent).await
        }
        Some("logout") => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
        Some("whoami") => run_whoami(&session),
        Some("generate") => {
            let jd_file = args
                .get(1)
                .filter(|a| !a.starts_with("--"))
                .context("Usage: resumeai generate <jd-file> [--pages N]")?;
            let pages = parse_pages(&args)?;
            run_generate(&session, &config, jd_file, pages).await
        }
        Some("watch") => {
            let job_id = args.get(1).context("Usage: resumeai watch <job-id>")?;
            run_watch(&session, &config, job_id).await
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

/// Filter directive applied when RUST_LOG is unset. Built from this crate's
/// module-path root (the bin name) rather than the hyphenated package name,
/// which never matches a tracing target.
fn default_log_directive(level: &str) -> String {
    format!("{}={level}", module_path!())
}

fn print_usage() {
    println!("ResumeAI client");
    println!();
    println!("Usage:");
    println!("  resumeai login [--signup]          Sign in (or sign up) via the hosted UI");
    println!("  resumeai logout                    Clear the stored session");
    println!("  resumeai whoami                    Show the signed-in identity");
    println!("  resumeai generate <jd-file> [--pages N]");
    println!("                                     Submit a job description and track the job");
    println!("  resumeai watch <job-id>            Resume tracking an existing job");
}

fn parse_pages(args: &[String]) -> Result<u8> {
    let Some(position) = args.iter().position(|a| a == "--pages") else {
        return Ok(1);
    };
    let pages: u8 = args
        .get(position + 1)
        .context("--pages requires a value")?
        .parse()
        .context("--pages must be a number")?;
    if !(1..=3).contains(&pages) {
        bail!("--pages must be 1, 2 or 3");
    }
    Ok(pages)
}

async fn run_login(
    session: &Arc<SessionManager>,
    provider: Arc<CognitoClient>,
    intent: AuthIntent,
) -> Result<()> {
    // Already signed in: nothing to do, mirror the login page redirect.
    if session.resolved_guard().await == AuthGate::Proceed {
        let identity = session.snapshot().identity.expect("authenticated session");
        println!("Already signed in as {}.", identity.display_name());
        return Ok(());
    }

    println!("Open this URL in your browser to continue:");
    println!();
    println!("  {}", provider.authorization_url(intent));
    println!();
    print!("Paste the redirect URL you were sent back to: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let redirect =
        reqwest::Url::parse(line.trim()).context("That does not look like a redirect URL")?;

    let handler = CallbackHandler::new(session.clone(), provider);
    match handler.handle(CallbackParams::from_redirect_url(&redirect)).await {
        CallbackOutcome::SignedIn(identity) => {
            println!("Welcome, {}!", identity.display_name());
            // Brief pause on the success state before moving on.
            tokio::time::sleep(SUCCESS_REDIRECT_DELAY).await;
            Ok(())
        }
        CallbackOutcome::Failed(message) => {
            bail!("{message} Run `resumeai login` to try again.")
        }
    }
}

fn run_whoami(session: &Arc<SessionManager>) -> Result<()> {
    match session.guard() {
        AuthGate::Proceed => {
            let identity = session.snapshot().identity.expect("authenticated session");
            println!("Signed in as {} ({})", identity.display_name(), identity.subject);
            if let Some(email) = &identity.email {
                println!("  email: {email}");
            }
            Ok(())
        }
        _ => {
            println!("Not signed in. Run `resumeai login`.");
            Ok(())
        }
    }
}

async fn run_generate(
    session: &Arc<SessionManager>,
    config: &Config,
    jd_file: &str,
    pages: u8,
) -> Result<()> {
    if session.resolved_guard().await != AuthGate::Proceed {
        bail!("Not signed in. Run `resumeai login` first.");
    }

    let jd_text = std::fs::read_to_string(jd_file)
        .with_context(|| format!("Could not read job description from '{jd_file}'"))?;
    if jd_text.trim().is_empty() {
        bail!("Job description file '{jd_file}' is empty");
    }

    let api = ApiClient::new(config.api_url.clone(), session.clone());
    let jobs = Arc::new(HttpJobsApi::new(api));

    let mut request = GenerateRequest::new(jd_text);
    request.page_count = pages;

    let submitted = jobs.submit(&request).await?;
    println!(
        "Job {} submitted ({}).",
        submitted.generated_resume_id, submitted.status
    );

    track_to_completion(JobPoller::new(jobs).track(submitted.generated_resume_id)).await
}

async fn run_watch(session: &Arc<SessionManager>, config: &Config, job_id: &str) -> Result<()> {
    if session.resolved_guard().await != AuthGate::Proceed {
        bail!("Not signed in. Run `resumeai login` first.");
    }

    let api = ApiClient::new(config.api_url.clone(), session.clone());
    let jobs = Arc::new(HttpJobsApi::new(api));
    track_to_completion(JobPoller::new(jobs).track(job_id)).await
}

/// Follows a tracked job until a terminal state, printing transitions.
/// Ctrl-C cancels the poll instead of killing it mid-query.
async fn track_to_completion(mut handle: JobHandle) -> Result<()> {
    let interrupted = tokio::select! {
        result = watch_states(&mut handle) => return result,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        handle.cancel();
        println!("Stopped watching job {}.", handle.job_id());
    }
    Ok(())
}

async fn watch_states(handle: &mut JobHandle) -> Result<()> {
    let mut last_status = String::new();
    loop {
        match handle.state() {
            JobState::InProgress { status } => {
                if status != last_status {
                    println!("  status: {status}");
                    last_status = status;
                }
            }
            JobState::Done { files } => {
                println!("Resume ready!");
                for file in files {
                    println!("  {} -> {}", file.file_type, file.download_url);
                }
                return Ok(());
            }
            JobState::Failed { reason } => {
                bail!("Generation failed: {reason}");
            }
            JobState::Cancelled => return Ok(()),
        }
        handle.changed().await;
    }
}
