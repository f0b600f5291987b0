use ctrlbus_text::{ClientConfig, ClientEvent, CommandClient};
use tracing::{info, warn};

use crate::cmd::ListenArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print, EventRecord, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let (client, mut events) = CommandClient::connect(args.addr, ClientConfig::default());
    let mut printed = 0usize;

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Some(ClientEvent::Connected(true)) => info!(addr = %args.addr, "connected"),
            Some(ClientEvent::Connected(false)) => warn!(addr = %args.addr, "disconnected, retrying"),
            Some(ClientEvent::Event(event)) => {
                print(&EventRecord::new(&event), format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            None => break,
        }
    }

    client.shutdown();
    Ok(SUCCESS)
}
