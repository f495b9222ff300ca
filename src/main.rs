use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, Level};

use dbmlc::render::DiagnosticRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Compact,
    Diagnostics,
}

impl OutputFormat {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            "diagnostics" => Some(Self::Diagnostics),
            _ => None,
        }
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::from_str(s).ok_or_else(|| format!("invalid format '{s}', expected json, compact or diagnostics"))
}

/// Compile DBML to its JSON model
#[derive(Debug, Parser)]
#[command(name = "dbmlc", version)]
struct Cli {
    /// Input file, or `-` for stdin
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: json, compact, diagnostics
    #[arg(short, long, default_value = "json", value_parser = parse_format)]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_input(input: &PathBuf) -> Result<(String, String), CliError> {
    if input.as_os_str() == "-" {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source).map_err(|source| CliError::Read {
            path: "<stdin>".to_string(),
            source,
        })?;
        return Ok(("<stdin>".to_string(), source));
    }
    let name = input.display().to_string();
    let source = fs::read_to_string(input).map_err(|source| CliError::Read {
        path: name.clone(),
        source,
    })?;
    Ok((name, source))
}

fn write_output(output: Option<&PathBuf>, text: &str) -> Result<(), CliError> {
    match output {
        Some(path) => fs::write(path, text).map_err(|source| CliError::Write {
            path: path.display().to_string(),
            source,
        }),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn run(cli: &Cli) -> Result<bool, CliError> {
    let (file_name, source) = read_input(&cli.input)?;
    debug!(file = %file_name, bytes = source.len(), "read input");

    let compilation = dbmlc::compile(&source);
    if compilation.has_errors() {
        let renderer = DiagnosticRenderer::default();
        eprintln!("{}", renderer.render_all(&source, &file_name, compilation.errors()));
        if cli.format == OutputFormat::Diagnostics {
            let diagnostics: Vec<_> = compilation.errors().iter().map(|e| e.to_diagnostic()).collect();
            write_output(cli.output.as_ref(), &serde_json::to_string_pretty(&diagnostics).unwrap_or_default())?;
        }
        return Ok(false);
    }

    let text = match (cli.format, compilation.database()) {
        (OutputFormat::Diagnostics, _) => "[]".to_string(),
        (OutputFormat::Compact, Some(db)) => serde_json::to_string(db).unwrap_or_default(),
        (_, Some(db)) => serde_json::to_string_pretty(db).unwrap_or_default(),
        (_, None) => String::new(),
    };
    write_output(cli.output.as_ref(), &text)?;
    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
    }
}
