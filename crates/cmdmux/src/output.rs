use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use cmdmux_frame::Payload;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

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

#[derive(Serialize)]
struct Record<'a> {
    kind: &'a str,
    seq: Option<usize>,
    args: &'a [Value],
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    kw: &'a serde_json::Map<String, Value>,
}

/// Prints what a conversation delivers, in arrival order.
///
/// The table format buffers rows and renders once in [`Printer::finish`].
pub struct Printer {
    format: OutputFormat,
    items: usize,
    rows: Vec<[String; 3]>,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            items: 0,
            rows: Vec::new(),
        }
    }

    pub fn initial(&mut self, payload: &Payload) {
        self.emit("initial", None, payload);
    }

    pub fn item(&mut self, payload: &Payload) {
        let seq = self.items;
        self.items += 1;
        self.emit("item", Some(seq), payload);
    }

    pub fn warning(&mut self, text: &str) {
        let payload = Payload::single(text);
        self.emit("warning", None, &payload);
    }

    pub fn reply(&mut self, payload: &Payload) {
        self.emit("reply", None, payload);
    }

    pub fn finish(self) {
        if self.rows.is_empty() {
            return;
        }
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["KIND", "SEQ", "PAYLOAD"]);
        for row in self.rows {
            table.add_row(row.to_vec());
        }
        println!("{table}");
    }

    fn emit(&mut self, kind: &str, seq: Option<usize>, payload: &Payload) {
        match self.format {
            OutputFormat::Json => {
                let record = Record {
                    kind,
                    seq,
                    args: &payload.args,
                    kw: &payload.kw,
                };
                println!(
                    "{}",
                    serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Table => {
                self.rows.push([
                    kind.to_uppercase(),
                    seq.map(|n| n.to_string()).unwrap_or_default(),
                    payload.to_string(),
                ]);
            }
            OutputFormat::Pretty => match seq {
                Some(n) => println!("{kind} {n}: {payload}"),
                None => println!("{kind}: {payload}"),
            },
            OutputFormat::Raw => print_raw(payload),
        }
    }
}

/// Each positional argument on its own line; strings without quotes.
fn print_raw(payload: &Payload) {
    let mut out = std::io::stdout().lock();
    for arg in &payload.args {
        let _ = match arg {
            Value::String(text) => writeln!(out, "{text}"),
            other => writeln!(out, "{other}"),
        };
    }
    let _ = out.flush();
}
