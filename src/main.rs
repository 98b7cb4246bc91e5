use call_coordinator::calls::{
    CallDependencies, CallManager, InMemoryCallHistory, LogTonePlayer,
};
use call_coordinator::config::CallManagerConfig;
use call_coordinator::loopback::LoopbackRelay;
use call_coordinator::test_utils::{MockMediaDevices, MockNegotiationEngine};
use callcore::{CallState, MediaKind, NotificationHandler, ParticipantId, StateChange};
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Plays a call between two in-process participants over a loopback relay.
//
// Usage:
//   cargo run                              # alice calls bob, bob answers
//   cargo run -- reject                    # bob declines
//   cargo run -- timeout --ring-timeout 3  # nobody answers
//   cargo run -- deny                      # bob's camera is blocked
//   cargo run -- glare                     # both call each other at once

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    Answer,
    Reject,
    Timeout,
    Deny,
    Glare,
}

#[derive(Debug, Parser)]
#[command(about = "Call session coordinator demo")]
struct Args {
    #[arg(value_enum, default_value = "answer")]
    scenario: Scenario,

    /// JSON file with a CallManagerConfig.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the ring window in seconds.
    #[arg(long)]
    ring_timeout: Option<u64>,

    /// How long an answered call stays up, in seconds.
    #[arg(long, default_value_t = 2)]
    talk: u64,

    /// Place an audio-only call.
    #[arg(long)]
    audio: bool,
}

struct LogNotifications(&'static str);

impl NotificationHandler for LogNotifications {
    fn handle_state_change(&self, change: &StateChange) {
        match change.outcome {
            Some(outcome) => info!(
                "[{}] #{} {} -> {} ({})",
                self.0,
                change.sequence,
                change.session_id,
                change.state,
                outcome.label()
            ),
            None => info!(
                "[{}] #{} {} -> {}",
                self.0, change.sequence, change.session_id, change.state
            ),
        }
    }
}

struct Participant {
    manager: CallManager,
    media: Arc<MockMediaDevices>,
    history: InMemoryCallHistory,
    changes: mpsc::UnboundedReceiver<StateChange>,
}

impl Participant {
    fn join(relay: &LoopbackRelay, name: &'static str, config: &CallManagerConfig) -> Self {
        let media = MockMediaDevices::new();
        let history = InMemoryCallHistory::new();
        let manager = CallManager::spawn(
            ParticipantId::new(name),
            config.clone(),
            CallDependencies {
                signaling: Arc::new(relay.channel_for(ParticipantId::new(name))),
                media: media.clone(),
                engine: MockNegotiationEngine::auto_connecting(),
                tones: Arc::new(LogTonePlayer),
                history: Arc::new(history.clone()),
            },
        );
        manager.add_handler(Arc::new(LogNotifications(name)));
        let changes = manager.subscribe();
        relay.attach(manager.clone());
        Self {
            manager,
            media,
            history,
            changes,
        }
    }

    async fn wait_for(&mut self, state: CallState) -> anyhow::Result<()> {
        while let Some(change) = self.changes.recv().await {
            if change.state == state {
                return Ok(());
            }
        }
        anyhow::bail!("{} stopped before reaching {state}", self.manager.local_participant())
    }
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        tokio::select! {
            result = run(args) => {
                if let Err(e) = result {
                    error!("Demo failed: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    });
}

fn load_config(args: &Args) -> anyhow::Result<CallManagerConfig> {
    let mut config = match &args.config {
        Some(path) => CallManagerConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => CallManagerConfig::default(),
    };
    if let Some(secs) = args.ring_timeout {
        config.ring_timeout_secs = secs;
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!("Running {:?} with {config:?}", args.scenario);

    let relay = LoopbackRelay::new();
    let mut alice = Participant::join(&relay, "alice", &config);
    let mut bob = Participant::join(&relay, "bob", &config);
    let kind = if args.audio {
        MediaKind::Audio
    } else {
        MediaKind::Video
    };

    match args.scenario {
        Scenario::Answer | Scenario::Deny => {
            if args.scenario == Scenario::Deny {
                bob.media.deny_permission();
            }
            alice.manager.start_call(ParticipantId::new("bob"), kind).await?;
            bob.wait_for(CallState::IncomingRinging).await?;
            bob.manager.accept_incoming().await?;
            if args.scenario == Scenario::Answer {
                alice.wait_for(CallState::Active).await?;
                tokio::time::sleep(Duration::from_secs(args.talk)).await;
                alice.manager.end_active().await?;
            }
        }
        Scenario::Reject => {
            alice.manager.start_call(ParticipantId::new("bob"), kind).await?;
            bob.wait_for(CallState::IncomingRinging).await?;
            bob.manager.reject_incoming().await?;
        }
        Scenario::Timeout => {
            alice.manager.start_call(ParticipantId::new("bob"), kind).await?;
        }
        Scenario::Glare => {
            relay.hold();
            alice.manager.start_call(ParticipantId::new("bob"), kind).await?;
            bob.manager.start_call(ParticipantId::new("alice"), kind).await?;
            relay.flush();
            alice.wait_for(CallState::Active).await?;
            bob.wait_for(CallState::Active).await?;
            tokio::time::sleep(Duration::from_secs(args.talk)).await;
            alice.manager.end_active().await?;
        }
    }

    alice.wait_for(CallState::Idle).await?;
    bob.wait_for(CallState::Idle).await?;

    for participant in [&alice, &bob] {
        participant.manager.shutdown().await?;
        for record in participant.history.records() {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        info!(
            "{}: {} acquired, {} released",
            participant.manager.local_participant(),
            participant.media.acquire_count(),
            participant.media.release_count()
        );
    }
    Ok(())
}
