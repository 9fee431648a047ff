use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use session_guard::clock::{Clock, ManualClock};
use session_guard::csrf::generate_token;
use session_guard::session::{
    ActivityKind, ExpiryReason, SessionEvent, SessionMonitor, WarningDecision,
};
use session_guard::throttle::{EndpointClass, ThrottleConfig};
use session_guard::{GuardConfig, GuardContext};

#[derive(Parser, Debug)]
#[command(name = "session-guard", version, about = "Inspect and exercise session guard policy")]
struct Cli {
    /// YAML configuration file; SESSION_GUARD__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which throttle class and quota each path falls under
    Classify {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Generate CSRF tokens
    Token {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Print the effective configuration as YAML
    Config,
    /// Replay a session timeline on a simulated clock and print its events
    Simulate {
        /// Seconds after login at which the user interacts (repeatable)
        #[arg(long = "activity", value_name = "SECS")]
        activity: Vec<u64>,

        /// Seconds after login at which the user answers the idle warning
        #[arg(long, value_name = "SECS")]
        answer_at: Option<u64>,

        /// Answer given at --answer-at
        #[arg(long, value_enum, default_value_t = Answer::Stay)]
        answer: Answer,

        /// Seconds after login at which the user explicitly extends the session
        #[arg(long, value_name = "SECS")]
        extend_at: Option<u64>,

        /// Stop after this many seconds even if the session is still alive
        #[arg(long, value_name = "SECS")]
        until: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Answer {
    Stay,
    Logout,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Activity,
    Answer(WarningDecision),
    Extend,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config = GuardConfig::load(cli.config.as_deref())?;
    info!(version = env!("CARGO_PKG_VERSION"), "Configuration loaded");

    match cli.command {
        Command::Classify { paths } => classify(&config.throttle, &paths),
        Command::Token { count } => {
            for _ in 0..count {
                println!("{}", generate_token());
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::Simulate {
            activity,
            answer_at,
            answer,
            extend_at,
            until,
        } => {
            let decision = match answer {
                Answer::Stay => WarningDecision::StayLoggedIn,
                Answer::Logout => WarningDecision::LogOut,
            };
            let mut script: Vec<(u64, Step)> =
                activity.into_iter().map(|at| (at, Step::Activity)).collect();
            script.extend(answer_at.map(|at| (at, Step::Answer(decision))));
            script.extend(extend_at.map(|at| (at, Step::Extend)));
            script.sort_by_key(|(at, _)| *at);
            simulate(config, script, until)
        }
    }
}

fn classify(throttle: &ThrottleConfig, paths: &[String]) -> anyhow::Result<()> {
    for path in paths {
        let class = EndpointClass::classify(path);
        let limit = throttle.limit_for(class);
        println!(
            "{path}\t{class}\t{} per {}s",
            limit.max_requests, limit.window_secs
        );
    }
    Ok(())
}

fn simulate(config: GuardConfig, script: Vec<(u64, Step)>, until: Option<u64>) -> anyhow::Result<()> {
    let horizon = until.unwrap_or(
        config.session.session_timeout_secs + config.session.warning_secs,
    );
    let clock = Arc::new(ManualClock::new(chrono::Utc::now().timestamp_millis().max(0) as u64));
    let start = clock.now_ms();

    let context = GuardContext::from_config(config, clock.clone())?;
    let mut events = context.events().subscribe();
    let mut monitor = context.login(
        "simulated-token",
        &serde_json::json!({ "id": "simulated-user" }),
        Arc::new(|reason: ExpiryReason| info!(reason = %reason, "Redirecting to login")),
    )?;

    let print_events = |events: &mut broadcast::Receiver<SessionEvent>, now: u64| {
        while let Ok(event) = events.try_recv() {
            let line = serde_json::json!({
                "at_secs": (now - start) / 1000,
                "event": event,
            });
            println!("{line}");
        }
    };

    for (at, step) in script {
        if at > horizon || monitor.state().is_terminal() {
            break;
        }
        advance(&clock, &mut monitor, start + at * 1000, |now| {
            print_events(&mut events, now)
        });
        match step {
            Step::Activity => {
                monitor.record_activity(ActivityKind::Pointer);
            }
            Step::Answer(decision) => {
                if let Err(e) = monitor.resolve_warning(decision) {
                    warn!(error = %e, "Warning answer had no effect");
                }
            }
            Step::Extend => {
                if let Err(e) = monitor.extend_session() {
                    warn!(error = %e, "Extend had no effect");
                }
            }
        }
        print_events(&mut events, clock.now_ms());
    }

    advance(&clock, &mut monitor, start + horizon * 1000, |now| {
        print_events(&mut events, now)
    });

    println!("{}", serde_json::to_string_pretty(&monitor.snapshot())?);
    Ok(())
}

/// Step the clock to each pending deadline up to `target`, firing it.
fn advance(clock: &ManualClock, monitor: &mut SessionMonitor, target: u64, mut on_step: impl FnMut(u64)) {
    while let Some(deadline) = monitor.next_deadline() {
        if deadline > target {
            break;
        }
        clock.set(deadline.max(clock.now_ms()));
        monitor.poll();
        on_step(clock.now_ms());
    }
    if clock.now_ms() < target {
        clock.advance(Duration::from_millis(target - clock.now_ms()));
    }
}
