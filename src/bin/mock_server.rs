//! Mock JSON-RPC server binary for integration testing
//!
//! Reads one JSON message per line from stdin and answers every message
//! carrying an `id` with `{"jsonrpc":"2.0","id":<same id>,"result":{...}}`.
//! Flags make it misbehave in the ways the harness has to cope with.

use clap::Parser;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mock_server")]
struct Args {
    /// Number of tools returned by tools/list
    #[arg(long, default_value_t = 0)]
    tools: usize,

    /// Number of resources returned by resources/list
    #[arg(long, default_value_t = 0)]
    resources: usize,

    /// Exit without reading anything
    #[arg(long)]
    exit_immediately: bool,

    /// Read requests but never answer
    #[arg(long)]
    silent: bool,

    /// Exit at the next request once this many replies were sent
    #[arg(long)]
    exit_after: Option<usize>,

    /// Answer initialize with a non-JSON line
    #[arg(long)]
    garbage_initialize: bool,

    /// Line written to stderr at startup
    #[arg(long)]
    stderr: Option<String>,

    /// Ignore SIGTERM so only a forced kill stops the process
    #[arg(long)]
    ignore_sigterm: bool,
}

fn main() {
    let args = Args::parse();

    if let Some(line) = &args.stderr {
        eprintln!("{}", line);
    }

    if args.exit_immediately {
        return;
    }

    #[cfg(unix)]
    {
        if args.ignore_sigterm {
            // SAFETY: installing SIG_IGN has no preconditions
            unsafe {
                libc::signal(libc::SIGTERM, libc::SIG_IGN);
            }
        }
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();
    let mut replies = 0usize;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break; // EOF
        }

        let message: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if args.silent {
            continue;
        }

        let Some(id) = message.get("id").cloned() else {
            continue; // notification
        };

        if args.exit_after == Some(replies) {
            break;
        }

        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let reply = if method == "initialize" && args.garbage_initialize {
            "mock server ready".to_string()
        } else {
            json!({ "jsonrpc": "2.0", "id": id, "result": result_for(method, &args) }).to_string()
        };

        writeln!(writer, "{}", reply).ok();
        writer.flush().ok();
        replies += 1;
    }

    if args.ignore_sigterm {
        // Keep the process around after EOF so stop has to escalate
        std::thread::sleep(Duration::from_secs(60));
    }
}

fn result_for(method: &str, args: &Args) -> Value {
    match method {
        "tools/list" if args.tools > 0 => json!({
            "tools": (1..=args.tools)
                .map(|i| json!({ "name": format!("tool-{}", i), "description": format!("Mock tool {}", i) }))
                .collect::<Vec<_>>()
        }),
        "resources/list" if args.resources > 0 => json!({
            "resources": (1..=args.resources)
                .map(|i| json!({ "name": format!("resource-{}", i) }))
                .collect::<Vec<_>>()
        }),
        _ => json!({}),
    }
}
