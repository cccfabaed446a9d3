use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mirrorlink_session::channels::DisplayFrame;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

/// A session lifecycle event.
#[derive(Debug, Serialize)]
pub struct SessionEvent {
    pub event: &'static str,
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: String,
}

impl SessionEvent {
    pub fn new(event: &'static str, role: &'static str) -> Self {
        Self {
            event,
            role,
            addr: None,
            state: None,
            detail: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn with_addr(mut self, addr: impl ToString) -> Self {
        self.addr = Some(addr.to_string());
        self
    }

    pub fn with_state(mut self, state: impl ToString) -> Self {
        self.state = Some(state.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    event: &'static str,
    index: i32,
    width: u32,
    height: u32,
    bytes: usize,
    peer: &'a str,
    timestamp: String,
}

pub fn print_event(event: &SessionEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "ROLE", "ADDR", "STATE", "DETAIL"])
                .add_row(vec![
                    event.event.to_string(),
                    event.role.to_string(),
                    event.addr.clone().unwrap_or_default(),
                    event.state.clone().unwrap_or_default(),
                    event.detail.clone().unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let mut line = format!("{} role={}", event.event, event.role);
            for (key, value) in [
                ("addr", &event.addr),
                ("state", &event.state),
                ("detail", &event.detail),
            ] {
                if let Some(value) = value {
                    line.push_str(&format!(" {key}={value}"));
                }
            }
            println!("{line}");
        }
    }
    let _ = std::io::stdout().flush();
}

pub fn print_frame(frame: &DisplayFrame, peer: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                index: frame.index,
                width: frame.width,
                height: frame.height,
                bytes: frame.pixels.len(),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "SIZE", "BYTES", "PEER"])
                .add_row(vec![
                    frame.index.to_string(),
                    format!("{}x{}", frame.width, frame.height),
                    frame.pixels.len().to_string(),
                    peer.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "frame index={} size={}x{} bytes={} peer={}",
                frame.index,
                frame.width,
                frame.height,
                frame.pixels.len(),
                peer
            );
        }
        OutputFormat::Raw => print_raw(&frame.pixels),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
