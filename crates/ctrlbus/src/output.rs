use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ctrlbus_register::{BootloaderInfo, CommandRegister, Register};
use ctrlbus_supervisor::SupervisorStatus;
use ctrlbus_text::{Ack, Event};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something the CLI prints as one JSON line, one table or one text line.
pub trait Record: Serialize {
    fn headers(&self) -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
    fn pretty(&self) -> String;
}

pub fn print<R: Record>(record: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(record.headers())
                .add_row(record.row());
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", record.pretty()),
    }
}

#[derive(Serialize)]
pub struct AckRecord<'a> {
    kind: &'static str,
    seq: u16,
    command: &'a str,
    status: &'static str,
    code: u32,
    params: &'a [String],
    timestamp: String,
}

impl<'a> AckRecord<'a> {
    pub fn new(ack: &'a Ack) -> Self {
        Self {
            kind: "ack",
            seq: ack.seq,
            command: &ack.name,
            status: ack.status.as_str(),
            code: ack.code,
            params: &ack.params,
            timestamp: now_unix_seconds(),
        }
    }
}

impl Record for AckRecord<'_> {
    fn headers(&self) -> Vec<&'static str> {
        vec!["SEQ", "COMMAND", "STATUS", "CODE", "PARAMS"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.seq.to_string(),
            self.command.to_string(),
            self.status.to_string(),
            self.code.to_string(),
            self.params.join(" "),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "seq={} command={} status={} code={} params=[{}]",
            self.seq,
            self.command,
            self.status,
            self.code,
            self.params.join(" ")
        )
    }
}

#[derive(Serialize)]
pub struct EventRecord<'a> {
    kind: &'static str,
    event: &'a str,
    params: &'a [String],
    timestamp: String,
}

impl<'a> EventRecord<'a> {
    pub fn new(event: &'a Event) -> Self {
        Self {
            kind: "event",
            event: &event.name,
            params: &event.params,
            timestamp: now_unix_seconds(),
        }
    }
}

impl Record for EventRecord<'_> {
    fn headers(&self) -> Vec<&'static str> {
        vec!["EVENT", "PARAMS"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.event.to_string(), self.params.join(" ")]
    }

    fn pretty(&self) -> String {
        format!("event={} params=[{}]", self.event, self.params.join(" "))
    }
}

#[derive(Serialize)]
pub struct RegisterRecord {
    kind: &'static str,
    address: u16,
    register: String,
    data: [u8; 4],
    valid: bool,
    changed: bool,
}

impl RegisterRecord {
    pub fn new(address: u16, register: String, reg: &Register) -> Self {
        Self {
            kind: "register",
            address,
            register,
            data: reg.data(),
            valid: reg.is_valid(),
            changed: reg.is_changed(),
        }
    }
}

impl Record for RegisterRecord {
    fn headers(&self) -> Vec<&'static str> {
        vec!["ADDRESS", "REGISTER", "DATA", "VALID", "CHANGED"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("0x{:03x}", self.address),
            self.register.clone(),
            hex(&self.data),
            self.valid.to_string(),
            self.changed.to_string(),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "address=0x{:03x} register={} data={} valid={} changed={}",
            self.address,
            self.register,
            hex(&self.data),
            self.valid,
            self.changed
        )
    }
}

#[derive(Serialize)]
pub struct CommandRecord {
    kind: &'static str,
    address: u16,
    command: u8,
    status: u8,
    result: [u8; 2],
    error: u8,
    error_text: String,
}

impl CommandRecord {
    pub fn new(address: u16, reg: &CommandRegister) -> Self {
        Self {
            kind: "command-register",
            address,
            command: reg.command,
            status: reg.status,
            result: [reg.b0, reg.b1],
            error: reg.error,
            error_text: reg.error_code().to_string(),
        }
    }
}

impl Record for CommandRecord {
    fn headers(&self) -> Vec<&'static str> {
        vec!["ADDRESS", "COMMAND", "STATUS", "RESULT", "ERROR"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("0x{:03x}", self.address),
            self.command.to_string(),
            self.status.to_string(),
            hex(&self.result),
            format!("{} ({})", self.error, self.error_text),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "address=0x{:03x} command={} status={} result={} error={} ({})",
            self.address,
            self.command,
            self.status,
            hex(&self.result),
            self.error,
            self.error_text
        )
    }
}

#[derive(Serialize)]
pub struct BootInfoRecord {
    kind: &'static str,
    device: u8,
    status: String,
    boot_revision: String,
    app_revision: String,
}

impl BootInfoRecord {
    pub fn new(device: u8, info: &BootloaderInfo) -> Self {
        Self {
            kind: "bootloader-info",
            device,
            status: info.status.to_string(),
            boot_revision: info.boot.to_string(),
            app_revision: info.app.to_string(),
        }
    }
}

impl Record for BootInfoRecord {
    fn headers(&self) -> Vec<&'static str> {
        vec!["DEVICE", "STATUS", "BOOT", "APP"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.device.to_string(),
            self.status.clone(),
            self.boot_revision.clone(),
            self.app_revision.clone(),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "device={} status={} boot={} app={}",
            self.device, self.status, self.boot_revision, self.app_revision
        )
    }
}

#[derive(Serialize)]
pub struct SupervisorRecord<'a> {
    kind: &'static str,
    driver: &'a str,
    connected: bool,
    revision: Option<String>,
    revision_valid: bool,
    board_revision: Option<String>,
    board_revision_valid: bool,
    ready: bool,
}

impl<'a> SupervisorRecord<'a> {
    pub fn new(driver: &'a str, status: &SupervisorStatus) -> Self {
        Self {
            kind: "supervisor-status",
            driver,
            connected: status.connected,
            revision: status.revision.map(|r| r.to_string()),
            revision_valid: status.revision_valid,
            board_revision: status.board_revision.map(|r| r.to_string()),
            board_revision_valid: status.board_revision_valid,
            ready: status.is_ready(),
        }
    }
}

impl Record for SupervisorRecord<'_> {
    fn headers(&self) -> Vec<&'static str> {
        vec!["DRIVER", "CONNECTED", "REVISION", "BOARD", "READY"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.driver.to_string(),
            self.connected.to_string(),
            revision_cell(self.revision.as_deref(), self.revision_valid),
            revision_cell(self.board_revision.as_deref(), self.board_revision_valid),
            self.ready.to_string(),
        ]
    }

    fn pretty(&self) -> String {
        format!(
            "driver={} connected={} revision={} board={} ready={}",
            self.driver,
            self.connected,
            revision_cell(self.revision.as_deref(), self.revision_valid),
            revision_cell(self.board_revision.as_deref(), self.board_revision_valid),
            self.ready
        )
    }
}

fn revision_cell(revision: Option<&str>, valid: bool) -> String {
    match revision {
        Some(revision) if valid => revision.to_string(),
        Some(revision) => format!("{revision} (mismatch)"),
        None => "-".to_string(),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
