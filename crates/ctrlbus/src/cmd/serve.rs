use ctrlbus_supervisor::{Revision, BOARD_INIT_COMMAND, REVISION_COMMAND};
use ctrlbus_text::{CommandReply, CommandServer, Event, ServerConfig};
use tracing::{debug, info};

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{text_error, CliResult, SUCCESS};

/// NOK code for commands the loopback driver does not implement.
const UNKNOWN_COMMAND: u32 = 1;

/// NOK code for `BoardInitialize` when no board revision was configured.
const NO_BOARD: u32 = 2;

pub async fn run(args: ServeArgs) -> CliResult<i32> {
    let heartbeat = args.heartbeat.as_deref().map(parse_duration).transpose()?;
    let config = ServerConfig {
        welcome_event: Some(Event::new("Welcome", vec![env!("CARGO_PKG_VERSION").to_string()])),
        ..ServerConfig::default()
    };
    let server = CommandServer::bind(args.bind, config)
        .await
        .map_err(|err| text_error("bind failed", err))?;
    // Printed on stdout so scripts can find the port when binding port 0.
    println!("listening on {}", server.local_addr());

    let revision = args.revision;
    let board = args.board_revision;
    let handle = server.serve(move |name: &str, params: &[String]| {
        debug!(command = name, ?params, "command received");
        handle_command(name, params, revision, board)
    });

    let mut ticker = heartbeat.map(tokio::time::interval);
    let mut beats = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick(&mut ticker) => {
                beats += 1;
                if handle.send_event("Heartbeat", vec![beats.to_string()]).is_err() {
                    break;
                }
            }
        }
    }

    info!("shutting down");
    handle.shutdown().await;
    Ok(SUCCESS)
}

fn handle_command(
    name: &str,
    params: &[String],
    revision: Revision,
    board: Option<Revision>,
) -> CommandReply {
    match name {
        REVISION_COMMAND => CommandReply::ok(revision_params(revision)),
        BOARD_INIT_COMMAND => match board {
            Some(board) => CommandReply::ok(revision_params(board)),
            None => CommandReply::error(NO_BOARD),
        },
        "Echo" => CommandReply::ok(params.to_vec()),
        _ => CommandReply::error(UNKNOWN_COMMAND),
    }
}

fn revision_params(revision: Revision) -> Vec<String> {
    vec![
        revision.major.to_string(),
        revision.minor.to_string(),
        revision.sub.to_string(),
    ]
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
