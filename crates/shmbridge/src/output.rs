use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use shmbridge_channel::{AudioChunk, Command, CommandKind, ControlState, VideoFrame};
use shmbridge_poll::{CommandSource, StatusLine, Utterance};

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
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One line of command output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event<'a> {
    Frame {
        index: u64,
        timestamp_us: i64,
        width: u32,
        height: u32,
        format: &'static str,
        row_bytes: u32,
        payload_size: usize,
    },
    Audio {
        timestamp_us: i64,
        sequence: u32,
        sample_rate: u32,
        channels: u32,
        frames: u32,
        format: &'static str,
        payload_size: usize,
    },
    Utterance {
        sample_rate: u32,
        channels: u32,
        frames: usize,
        duration_ms: u64,
    },
    Command {
        source: &'static str,
        kind: &'static str,
        revision: u64,
        payload_size: usize,
        payload: serde_json::Value,
    },
    State {
        state: &'static str,
        raw: i32,
    },
    Status(&'a StatusLine),
    Sent {
        region: &'a str,
        kind: &'static str,
        revision: u64,
        signalled: bool,
    },
    Published {
        region: &'a str,
        index: u64,
        width: u32,
        height: u32,
    },
    Empty {
        region: &'a str,
    },
}

impl<'a> Event<'a> {
    pub fn frame(frame: &VideoFrame) -> Self {
        Event::Frame {
            index: frame.index,
            timestamp_us: frame.timestamp_us,
            width: frame.width,
            height: frame.height,
            format: frame.format.as_str(),
            row_bytes: frame.row_bytes,
            payload_size: frame.pixels.len(),
        }
    }

    pub fn audio(chunk: &AudioChunk) -> Self {
        Event::Audio {
            timestamp_us: chunk.timestamp_us,
            sequence: chunk.sequence,
            sample_rate: chunk.sample_rate,
            channels: chunk.channels,
            frames: chunk.frames,
            format: chunk.format.as_str(),
            payload_size: chunk.samples.len(),
        }
    }

    pub fn utterance(utterance: &Utterance) -> Self {
        Event::Utterance {
            sample_rate: utterance.sample_rate,
            channels: utterance.channels,
            frames: utterance.frames(),
            duration_ms: utterance.duration().as_millis() as u64,
        }
    }

    pub fn command(source: CommandSource, command: &Command) -> Self {
        Event::Command {
            source: source.as_str(),
            kind: command.kind.as_str(),
            revision: command.revision,
            payload_size: command.payload.len(),
            payload: command_payload(command),
        }
    }

    pub fn state(state: ControlState) -> Self {
        Event::State {
            state: state.as_str(),
            raw: state.to_wire(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Event::Frame { .. } => "frame",
            Event::Audio { .. } => "audio",
            Event::Utterance { .. } => "utterance",
            Event::Command { .. } => "command",
            Event::State { .. } => "state",
            Event::Status(_) => "status",
            Event::Sent { .. } => "sent",
            Event::Published { .. } => "published",
            Event::Empty { .. } => "empty",
        }
    }

    /// Field names and rendered values, in display order.
    fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Event::Frame {
                index,
                timestamp_us,
                width,
                height,
                format,
                row_bytes,
                payload_size,
            } => vec![
                ("index", index.to_string()),
                ("timestamp_us", timestamp_us.to_string()),
                ("size", format!("{width}x{height}")),
                ("format", format.to_string()),
                ("row_bytes", row_bytes.to_string()),
                ("bytes", payload_size.to_string()),
            ],
            Event::Audio {
                timestamp_us,
                sequence,
                sample_rate,
                channels,
                frames,
                format,
                payload_size,
            } => vec![
                ("timestamp_us", timestamp_us.to_string()),
                ("sequence", sequence.to_string()),
                ("rate", sample_rate.to_string()),
                ("channels", channels.to_string()),
                ("frames", frames.to_string()),
                ("format", format.to_string()),
                ("bytes", payload_size.to_string()),
            ],
            Event::Utterance {
                sample_rate,
                channels,
                frames,
                duration_ms,
            } => vec![
                ("rate", sample_rate.to_string()),
                ("channels", channels.to_string()),
                ("frames", frames.to_string()),
                ("duration_ms", duration_ms.to_string()),
            ],
            Event::Command {
                source,
                kind,
                revision,
                payload_size,
                payload,
            } => vec![
                ("source", source.to_string()),
                ("kind", kind.to_string()),
                ("revision", revision.to_string()),
                ("bytes", payload_size.to_string()),
                ("payload", render_value(payload)),
            ],
            Event::State { state, raw } => {
                vec![("state", state.to_string()), ("raw", raw.to_string())]
            }
            Event::Status(status) => vec![("status", status.to_string())],
            Event::Sent {
                region,
                kind,
                revision,
                signalled,
            } => vec![
                ("region", region.to_string()),
                ("kind", kind.to_string()),
                ("revision", revision.to_string()),
                ("signalled", signalled.to_string()),
            ],
            Event::Published {
                region,
                index,
                width,
                height,
            } => vec![
                ("region", region.to_string()),
                ("index", index.to_string()),
                ("size", format!("{width}x{height}")),
            ],
            Event::Empty { region } => vec![("region", region.to_string())],
        }
    }
}

/// Print one event. In raw mode only `raw` bytes are written, if any.
pub fn print_event(event: &Event<'_>, raw: Option<&[u8]>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let fields = event.fields();
            let mut header = vec!["EVENT".to_string()];
            header.extend(fields.iter().map(|(k, _)| k.to_uppercase()));
            let mut row = vec![event.name().to_string()];
            row.extend(fields.into_iter().map(|(_, v)| v));

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header)
                .add_row(row);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty_line(event)),
        OutputFormat::Raw => {
            if let Some(bytes) = raw {
                print_raw(bytes);
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn pretty_line(event: &Event<'_>) -> String {
    let mut line = event.name().to_string();
    for (key, value) in event.fields() {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&value);
    }
    line
}

fn command_payload(command: &Command) -> serde_json::Value {
    let decoded = match command.kind {
        CommandKind::Text => command
            .text()
            .map(|text| serde_json::Value::String(text.to_string())),
        CommandKind::Structured(_) => command
            .decode_payload()
            .and_then(|payload| Ok(serde_json::to_value(payload)?)),
    };
    decoded.unwrap_or_else(|_| {
        serde_json::Value::String(format!("<binary {} bytes>", command.payload.len()))
    })
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use shmbridge_channel::{AgentMode, CommandPayload, CommandType};

    use super::*;

    fn command(kind: CommandKind, payload: Vec<u8>) -> Command {
        Command {
            kind,
            revision: 7,
            payload: payload.into(),
        }
    }

    #[test]
    fn text_command_payload_is_a_string() {
        let event = Event::command(
            CommandSource::Text,
            &command(CommandKind::Text, b"go to github.com".to_vec()),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "command");
        assert_eq!(json["payload"], "go to github.com");
        assert_eq!(json["revision"], 7);
    }

    #[test]
    fn structured_payload_is_decoded() {
        let payload = CommandPayload::SetMode(AgentMode::Agent).encode().unwrap();
        let event = Event::command(
            CommandSource::Structured,
            &command(CommandKind::Structured(CommandType::SetMode), payload),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "set-mode");
        assert_eq!(json["payload"]["data"], "agent");
    }

    #[test]
    fn undecodable_payload_is_summarized() {
        let event = Event::command(
            CommandSource::Text,
            &command(CommandKind::Text, vec![0xff, 0xfe]),
        );
        assert_eq!(pretty_line(&event).split(' ').last(), Some("bytes>"));
    }

    #[test]
    fn pretty_line_lists_fields() {
        let event = Event::State {
            state: "listening",
            raw: 1,
        };
        assert_eq!(pretty_line(&event), "state state=listening raw=1");
    }
}
