use std::time::Duration;

use ctrlbus_register::{CommandRegister, DeviceConfig, DeviceProtocol, Register, RegisterLayout};

use crate::cmd::{parse_duration, ReadArgs, RegisterKind};
use crate::exit::{bridge_error, register_error, CliError, CliResult, SUCCESS};
use crate::output::{print, CommandRecord, OutputFormat, RegisterRecord};

enum Reading {
    Register(String, Register),
    Command(CommandRegister),
}

pub async fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let filter_timeout = parse_duration(&args.timeout)?;
    let config = DeviceConfig {
        device_id: args.device,
        layout: layout_for(args.class, args.index),
        response_timeout: parse_duration(&args.response_timeout)?,
        ..DeviceConfig::default()
    };
    let mut device = DeviceProtocol::connect(args.bridge, &config);
    let address = device.engine().address();

    let result = read_once(&mut device, &args, filter_timeout).await;
    device.shutdown();

    match result? {
        Reading::Register(label, reg) => print(&RegisterRecord::new(address, label, &reg), format),
        Reading::Command(reg) => print(&CommandRecord::new(address, &reg), format),
    }
    Ok(SUCCESS)
}

/// Smallest layout that holds the requested register.
fn layout_for(kind: RegisterKind, index: u8) -> RegisterLayout {
    let slots = usize::from(index) + 1;
    match kind {
        RegisterKind::Status => RegisterLayout::new(slots, 0, 0),
        RegisterKind::Data => RegisterLayout::new(0, slots, 0),
        RegisterKind::Param => RegisterLayout::new(0, 0, slots),
        RegisterKind::Revision | RegisterKind::Errors | RegisterKind::Command => {
            RegisterLayout::default()
        }
    }
}

async fn read_once(
    device: &mut DeviceProtocol,
    args: &ReadArgs,
    filter_timeout: Duration,
) -> CliResult<Reading> {
    tokio::time::timeout(filter_timeout, device.bridge().wait_filter_open())
        .await
        .map_err(|_| CliError::timeout(&format!("bridge filter at {}", args.bridge)))?
        .map_err(|err| bridge_error("bridge connection failed", err))?;

    let idx = args.index;
    let reading = match args.class {
        RegisterKind::Revision => {
            Reading::Register("revision".to_string(), device.read_revision().await.map_err(failed)?)
        }
        RegisterKind::Errors => {
            Reading::Register("errors".to_string(), device.read_errors().await.map_err(failed)?)
        }
        RegisterKind::Command => Reading::Command(device.read_command().await.map_err(failed)?),
        RegisterKind::Status => {
            Reading::Register(format!("status[{idx}]"), device.read_status(idx).await.map_err(failed)?)
        }
        RegisterKind::Data => {
            Reading::Register(format!("data[{idx}]"), device.read_data(idx).await.map_err(failed)?)
        }
        RegisterKind::Param => {
            Reading::Register(format!("param[{idx}]"), device.read_param(idx).await.map_err(failed)?)
        }
    };
    Ok(reading)
}

fn failed(err: ctrlbus_register::RegisterError) -> CliError {
    register_error("read failed", err)
}
