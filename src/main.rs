use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use voxchat::audio::{
    AudioPlayback, DoneReason, HttpMediaPlayer, MediaPlayer, PhaseChange, RemoteAudioSession,
};
use voxchat::{
    Backend, ChannelRecognizer, Config, ConversationController, ConversationEvent,
    ConversationHandle, RecognizerFeed, TurnState, UserIdentity,
};

/// voxchat - Hold-to-talk voice chat with a remote assistant
#[derive(Parser)]
#[command(name = "voxchat", version, about)]
struct Cli {
    /// Backend base URL (overrides config file and VOXCHAT_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive conversation (default)
    Chat,
    /// Speak text with the backend voice
    Speak {
        /// Text to speak
        text: String,
    },
    /// Print this installation's user id
    UserId,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,voxchat=info",
        1 => "info,voxchat=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url)?;
    }
    tracing::debug!(?config, "loaded configuration");

    let identity = UserIdentity::load_or_create(&config.identity_path())?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(config, &identity.user_id).await,
        Command::Speak { text } => speak(&config, &text).await,
        Command::UserId => {
            println!("{}", identity.user_id);
            Ok(())
        }
    }
}

fn media_player(config: &Config) -> anyhow::Result<Arc<dyn MediaPlayer>> {
    let output = AudioPlayback::new()?;
    Ok(Arc::new(HttpMediaPlayer::new(
        Backend::from_config(config),
        Arc::new(output),
    )))
}

/// Play one `/speech` request to completion
async fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let url = Backend::from_config(config).speech_url(text)?;
    let player = media_player(config)?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut session = RemoteAudioSession::play(player, &url, tx);

    while let Some(signal) = rx.recv().await {
        match session.apply(signal) {
            Some(PhaseChange::Playing) => tracing::info!(%url, "playing"),
            Some(PhaseChange::Done(DoneReason::Failed(e))) => anyhow::bail!("playback failed: {e}"),
            Some(PhaseChange::Done(_)) => break,
            None => {}
        }
    }

    Ok(())
}

const HELP: &str = "\
commands:
  /record       start a new turn
  /redo         discard what was said so far
  /send         finish the turn and ask the assistant
  /stop         stop the spoken reply
  /speak TEXT   speak TEXT with the assistant voice
  /quit         exit
any other line is treated as recognized speech while recording";

/// Interactive conversation on stdin
///
/// Typed lines stand in for the speech recognizer: each line extends the
/// running transcript the way a streaming engine would.
async fn chat(config: Config, user_id: &str) -> anyhow::Result<()> {
    let player = media_player(&config)?;
    let (recognizer, feed) = ChannelRecognizer::new();

    let handle = ConversationController::spawn(
        Arc::new(config),
        user_id,
        Arc::new(recognizer),
        player,
    );
    let printer = tokio::spawn(print_events(handle.clone()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut spoken = String::new();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match handle_line(&handle, &feed, &mut spoken, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("! {e}"),
        }
    }

    handle.shutdown().await?;
    printer.abort();
    Ok(())
}

/// Apply one input line; returns false when the user asked to quit
async fn handle_line(
    handle: &ConversationHandle,
    feed: &RecognizerFeed,
    spoken: &mut String,
    line: &str,
) -> voxchat::Result<bool> {
    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return Ok(false),
        ("/record", _) => {
            spoken.clear();
            handle.begin_recording().await?;
        }
        ("/redo", _) => handle.cancel_and_rerecord().await?,
        ("/send", _) => {
            let turn = handle.finalize_recording().await?;
            println!("you: {}", turn.text);
        }
        ("/stop", _) => handle.stop_playback().await?,
        ("/speak", text) => handle.speak(text).await?,
        ("", _) => {}
        _ if line.starts_with('/') => println!("{HELP}"),
        _ => {
            if handle.state().turn_state != TurnState::Recording {
                println!("(not recording, type /record first)");
                return Ok(true);
            }
            if !spoken.is_empty() {
                spoken.push(' ');
            }
            spoken.push_str(line);
            if !feed.partial(spoken.as_str()) {
                // Recognizer ended on its own; re-record restarts it
                spoken.clear();
                println!("(recognizer stopped, type /redo to listen again)");
            }
        }
    }
    Ok(true)
}

async fn print_events(handle: ConversationHandle) {
    let events = handle.events();
    tokio::pin!(events);
    let mut shown = String::new();

    while let Some(event) = events.next().await {
        match event {
            ConversationEvent::StateChanged(state) => println!("[{state:?}]"),
            ConversationEvent::TranscriptUpdated(text) => println!("  … {text}"),
            ConversationEvent::ReplyOpened { .. } => shown.clear(),
            ConversationEvent::ReplyUpdated(text) => {
                // Print only what is new since the last update
                match text.strip_prefix(shown.as_str()) {
                    Some(rest) if !shown.is_empty() => println!("assistant: …{rest}"),
                    _ => println!("assistant: {text}"),
                }
                shown = text;
            }
            ConversationEvent::ReplyFinished { status, .. } => {
                tracing::debug!(?status, "reply finished");
            }
            ConversationEvent::AudioPhaseChanged(phase) => tracing::debug!(%phase, "audio"),
            ConversationEvent::TurnStarted(turn) => {
                tracing::debug!(message_id = %turn.message_id, "turn started");
            }
        }
    }
}
