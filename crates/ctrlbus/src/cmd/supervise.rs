use std::fs::OpenOptions;
use std::io;

use ctrlbus_supervisor::{
    ChildProcess, LaunchConfig, ProcessControl, Supervisor, SupervisorConfig, SupervisorEvent,
    WriterSink, BOARD_INIT_COMMAND,
};

use crate::cmd::{parse_duration, SuperviseArgs};
use crate::exit::{io_error, supervisor_error, CliError, CliResult, FAILURE, NOT_READY, SUCCESS};
use crate::output::{print, EventRecord, OutputFormat, SupervisorRecord};

/// A driver launched by this command, or one managed by someone else.
enum DriverProcess {
    Child(ChildProcess),
    External,
}

impl ProcessControl for DriverProcess {
    fn is_running(&mut self) -> bool {
        match self {
            Self::Child(child) => child.is_running(),
            Self::External => true,
        }
    }

    fn start(&mut self) -> io::Result<()> {
        match self {
            Self::Child(child) => child.start(),
            Self::External => Ok(()),
        }
    }

    fn stop(&mut self) -> io::Result<()> {
        match self {
            Self::Child(child) => child.stop(),
            Self::External => Ok(()),
        }
    }
}

pub async fn run(args: SuperviseArgs, format: OutputFormat) -> CliResult<i32> {
    let startup_timeout = parse_duration(&args.startup_timeout)?;
    let process = match &args.program {
        Some(program) => DriverProcess::Child(ChildProcess::new(LaunchConfig {
            program: program.clone(),
            args: args.args.clone(),
        })),
        None => DriverProcess::External,
    };
    let config = SupervisorConfig {
        name: args.name.clone(),
        startup_timeout,
        expected_revision: args.expect,
        expected_board_revision: args.expect_board,
        ..SupervisorConfig::default()
    };

    let mut supervisor = Supervisor::new(args.addr, process, config);
    if let Some(path) = &args.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        supervisor = supervisor.with_sink(WriterSink::new(file));
    }

    supervisor
        .start()
        .await
        .map_err(|err| supervisor_error("start failed", err))?;

    let outcome = if args.once {
        tokio::time::timeout(startup_timeout + HANDSHAKE_ALLOWANCE, watch(&mut supervisor, true, format))
            .await
            .map_err(|_| CliError::timeout("driver handshake"))
    } else {
        Ok(watch(&mut supervisor, false, format).await)
    };

    supervisor
        .shutdown()
        .map_err(|err| supervisor_error("shutdown failed", err))?;
    outcome
}

/// Time allowed for connecting and both handshake acks in `--once` mode.
const HANDSHAKE_ALLOWANCE: std::time::Duration = std::time::Duration::from_secs(10);

async fn watch(
    supervisor: &mut Supervisor<DriverProcess>,
    once: bool,
    format: OutputFormat,
) -> i32 {
    loop {
        let event = tokio::select! {
            event = supervisor.next_event() => event,
            _ = tokio::signal::ctrl_c() => return SUCCESS,
        };
        let handshake_done = match event {
            None => return FAILURE,
            Some(SupervisorEvent::BoardRevision { .. }) => true,
            Some(SupervisorEvent::HandshakeFailed { command, .. }) => command == BOARD_INIT_COMMAND,
            Some(SupervisorEvent::Connected(false)) => {
                print_status(supervisor, format);
                false
            }
            Some(SupervisorEvent::Event(event)) => {
                print(&EventRecord::new(&event), format);
                false
            }
            Some(_) => false,
        };

        if handshake_done {
            print_status(supervisor, format);
            if once {
                return if supervisor.is_ready() { SUCCESS } else { NOT_READY };
            }
        }
    }
}

fn print_status(supervisor: &Supervisor<DriverProcess>, format: OutputFormat) {
    let status = supervisor.status();
    print(&SupervisorRecord::new(&supervisor.config().name, &status), format);
}
