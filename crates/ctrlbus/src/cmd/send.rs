use std::time::Duration;

use ctrlbus_text::{Ack, ClientConfig, CommandClient};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{text_error, CliError, CliResult, REJECTED, SUCCESS};
use crate::output::{print, AckRecord, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ClientConfig {
        ack_timeout: Some(timeout),
        ..ClientConfig::default()
    };
    let (client, _events) = CommandClient::connect(args.addr, config);

    let result = send_once(&client, &args, timeout).await;
    client.shutdown();
    let ack = result?;

    print(&AckRecord::new(&ack), format);
    Ok(if ack.is_ok() { SUCCESS } else { REJECTED })
}

async fn send_once(client: &CommandClient, args: &SendArgs, timeout: Duration) -> CliResult<Ack> {
    tokio::time::timeout(timeout, client.wait_connected())
        .await
        .map_err(|_| CliError::timeout(&format!("connect to {}", args.addr)))?
        .map_err(|err| text_error("connect failed", err))?;

    client
        .request(&args.name, &args.params)
        .await
        .map_err(|err| text_error("request failed", err))
}
