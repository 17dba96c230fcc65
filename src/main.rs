use std::io::{self, Read, Write};
use std::path::Path;

use bytes::Bytes;
use threadbridge::config::{load_config, AppConfig};
use threadbridge::error::{BridgeError, ErrorCategory};
use threadbridge::observability::init_tracing;
use threadbridge::protocol::messages::MessagesRequest;
use threadbridge::state::BridgeState;
use threadbridge::stream::{
    aggregate_backend_stream, cancel_pair, encode_stream_event, pump_backend_stream,
    sse_frame_stream, StreamTransformer, TransformOptions,
};
use tokio::sync::mpsc;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const USAGE: &str = "\
usage: threadbridge [--config PATH] <command>

commands:
  translate-request <request.json|->
      Print the backend request for a Messages API request.
  replay <frames.sse|-> [--model NAME] [--aggregate]
      Translate recorded backend SSE frames into client events, or into
      one aggregated response with --aggregate.
";

enum Command {
    TranslateRequest {
        input: String,
    },
    Replay {
        input: String,
        model: String,
        aggregate: bool,
    },
}

struct Cli {
    config_path: Option<String>,
    command: Command,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut model = None;
    let mut aggregate = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(args.next().ok_or("--config needs a path")?);
            }
            "--model" => {
                model = Some(args.next().ok_or("--model needs a name")?);
            }
            "--aggregate" => aggregate = true,
            "-h" | "--help" => return Err(String::new()),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("translate-request") => Command::TranslateRequest {
            input: positional.next().ok_or("translate-request needs an input")?,
        },
        Some("replay") => Command::Replay {
            input: positional.next().ok_or("replay needs an input")?,
            model: model.unwrap_or_else(|| "replay".to_string()),
            aggregate,
        },
        Some(other) => return Err(format!("unknown command '{other}'")),
        None => return Err(String::new()),
    };
    Ok(Cli {
        config_path,
        command,
    })
}

fn main() {
    let cli = parse_args(std::env::args().skip(1)).unwrap_or_else(|msg| {
        if !msg.is_empty() {
            eprintln!("error: {msg}\n");
        }
        eprint!("{USAGE}");
        std::process::exit(2);
    });

    let config = resolve_config(cli.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    init_tracing(&config.features.log_level);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(err) = runtime.block_on(run(config, cli.command)) {
        if err.is_reportable() {
            eprintln!("error: {err}");
        }
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &BridgeError) -> i32 {
    match err.category() {
        ErrorCategory::InvalidRequest => 2,
        ErrorCategory::ClientClosed => 130,
        ErrorCategory::ServerError => 1,
    }
}

/// An explicit path must load; the default path is optional.
fn resolve_config(path: Option<&str>) -> Result<AppConfig, BridgeError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)?,
        None => AppConfig::default(),
    };
    Ok(config)
}

fn read_input(input: &str) -> io::Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(input)
    }
}

async fn run(config: AppConfig, command: Command) -> Result<(), BridgeError> {
    match command {
        Command::TranslateRequest { input } => {
            let raw = read_input(&input)?;
            let request: MessagesRequest = serde_json::from_slice(&raw)?;
            let state = BridgeState::new(config);
            let turn = state.prepare_turn(request, None)?;
            let json = serde_json::to_string_pretty(&turn.request)?;
            println!("{json}");
            Ok(())
        }
        Command::Replay {
            input,
            model,
            aggregate,
        } => {
            let raw = read_input(&input)?;
            let state = BridgeState::new(config);
            let mut options = TransformOptions::new(model);
            options.passthrough = state.config.features.passthrough;
            options.max_pending_bytes = state.config.translation.max_pending_buffer_bytes;
            let transformer = StreamTransformer::new(options, state.signatures().clone());
            let chunks = futures_util::stream::iter([Ok::<_, io::Error>(Bytes::from(raw))]);
            let frames = sse_frame_stream(chunks);

            if aggregate {
                let response = aggregate_backend_stream(frames, transformer).await;
                let json = serde_json::to_string_pretty(&response)?;
                println!("{json}");
                return Ok(());
            }

            replay_stream(frames, transformer).await
        }
    }
}

async fn replay_stream(
    frames: impl futures_util::Stream<Item = threadbridge::stream::SseEvent>,
    mut transformer: StreamTransformer,
) -> Result<(), BridgeError> {
    let (tx, mut rx) = mpsc::channel(64);
    let (_cancel, signal) = cancel_pair();

    let pump = async {
        let outcome = pump_backend_stream(frames, &mut transformer, &tx, signal).await;
        drop(tx);
        outcome
    };
    let print = async {
        let mut stdout = io::stdout().lock();
        while let Some(event) = rx.recv().await {
            stdout.write_all(encode_stream_event(&event).as_bytes())?;
        }
        stdout.flush()
    };
    let (outcome, printed) = tokio::join!(pump, print);
    tracing::info!(?outcome, "replay finished");
    printed?;
    outcome.into_result().map(|_| ())
}
