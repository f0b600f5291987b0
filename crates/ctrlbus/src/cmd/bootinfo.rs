use ctrlbus_bridge::BridgeConfig;
use ctrlbus_register::{BootloaderConfig, BootloaderProtocol};

use crate::cmd::{parse_duration, BootinfoArgs};
use crate::exit::{bridge_error, register_error, CliError, CliResult, SUCCESS};
use crate::output::{print, BootInfoRecord, OutputFormat};

pub async fn run(args: BootinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = BootloaderConfig {
        response_timeout: timeout,
    };
    let mut bootloader =
        BootloaderProtocol::connect(args.bridge, args.device, &config, BridgeConfig::default());

    let result = async {
        tokio::time::timeout(timeout, bootloader.bridge().wait_filter_open())
            .await
            .map_err(|_| CliError::timeout(&format!("bridge filter at {}", args.bridge)))?
            .map_err(|err| bridge_error("bridge connection failed", err))?;
        bootloader
            .get_info()
            .await
            .map_err(|err| register_error("GET_INFO failed", err))
    }
    .await;
    bootloader.shutdown();

    let info = result?;
    print(&BootInfoRecord::new(args.device, &info), format);
    Ok(SUCCESS)
}
