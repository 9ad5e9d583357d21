use std::env;
use std::io;
use std::process::ExitCode;

use voxwire_cli::{run, CommandKind, CommonOptions};

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(1)
        }
    }
}

fn run_cli() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage_text());
    }
    if args[0] == "-h" || args[0] == "--help" {
        print_usage();
        return Ok(());
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while index < args.len() {
        match args[index].as_str() {
            "--host" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --host".to_string())?;
                options.host = value.clone();
                index += 2;
            }
            "--port" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --port".to_string())?;
                options.port = value
                    .parse::<u16>()
                    .map_err(|_| format!("invalid --port value '{value}' (expected u16)"))?;
                index += 2;
            }
            "--timeout-ms" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --timeout-ms".to_string())?;
                options.timeout_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --timeout-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            "--retry-ms" => {
                let value = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --retry-ms".to_string())?;
                options.retry_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --retry-ms value '{value}' (expected u64)"))?;
                index += 2;
            }
            _ => break,
        }
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?
        .as_str();
    let command_args = &args[(index + 1)..];

    let kind = match command {
        "send" => {
            let Some((action, items)) = command_args.split_first() else {
                return Err("send requires an action".to_string());
            };
            CommandKind::Send {
                action: action.clone(),
                items: items.join(" "),
            }
        }
        "script" => match command_args {
            [path] => CommandKind::Script { path: path.clone() },
            [] => return Err("script requires a file path".to_string()),
            _ => return Err("script takes exactly one file path".to_string()),
        },
        "mirror" => {
            if !command_args.is_empty() {
                return Err("mirror takes no arguments".to_string());
            }
            CommandKind::Mirror
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };

    run(kind, options, &mut io::stdout())
}

fn print_usage() {
    println!("{}", usage_text());
}

fn usage_text() -> String {
    [
        "voxwire_cli - probe client and mirror for voxwire peers",
        "",
        "Usage:",
        "  voxwire_cli [--host <addr>] [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] send <action> [items-json]",
        "  voxwire_cli [--host <addr>] [--port <u16>] [--timeout-ms <u64>] [--retry-ms <u64>] script <file>",
        "  voxwire_cli [--host <addr>] [--port <u16>] mirror",
        "",
        "Script lines are either a full JSON envelope or `<action> <items-json>`; blank",
        "lines and lines starting with # are skipped.",
        "",
        "Defaults:",
        "  --host 127.0.0.1",
        "  --port 39876",
        "  --timeout-ms 5000",
        "  --retry-ms 100",
    ]
    .join("\n")
}
