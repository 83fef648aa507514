// tools/poe_cli/main.rs
//
// Command-line front end for the codecs: encode a command to wire bytes,
// decode captured bytes into table rows, or print a column schema.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use poe_terminal_lib::logging::{self, LogLevel};
use poe_terminal_lib::protocol::{
    Decoded, PoeCanableCommand, PoeSerialCommand, SimpleSerialCommand,
};
use poe_terminal_lib::settings::{self, AppSettings};
use poe_terminal_lib::table::RecordRenderer;
use poe_terminal_lib::{tlog, Codec, Dictionary, FrameTable, OutgoingCommand, ProtocolKind, Symbol};

#[derive(Parser)]
#[command(name = "poe_cli")]
#[command(about = "Encode and decode POE device traffic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the per-user settings.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// none, error, warning, info or debug; overrides the settings file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write log output to a file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a command and print the bytes that would be written
    Encode {
        /// SimpleSerial, POESerial, POECanable or POECanableFD
        #[arg(short, long)]
        protocol: Option<String>,
        /// Header name or code
        #[arg(long, default_value = "GET")]
        header: String,
        /// Argument name or code
        #[arg(long, default_value = "")]
        argument: String,
        /// POESerial value
        #[arg(long, default_value = "")]
        value: String,
        /// POECanable target address
        #[arg(long, default_value_t = 0)]
        target: u32,
        /// POECanable return address
        #[arg(long = "return", default_value_t = 0)]
        return_id: u32,
        /// Payload text (SimpleSerial line, POECanable data)
        #[arg(long)]
        data: Option<String>,
        /// POECanable: treat data as hex bytes and send them base64-encoded
        #[arg(long)]
        base64: bool,
    },
    /// Decode bytes from stdin and print one row per record
    Decode {
        #[arg(short, long)]
        protocol: Option<String>,
        /// Separate cells with this string
        #[arg(long, default_value = "\t")]
        separator: String,
    },
    /// Print the column schema as JSON
    Columns {
        #[arg(short, long)]
        protocol: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tlog!(LogLevel::Error, "[poe_cli] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config_path = cli.config.clone().unwrap_or_else(settings::default_settings_path);
    let settings = settings::load_settings(&config_path).map_err(|e| e.to_string())?;

    let level = match cli.log_level.as_deref() {
        Some(name) => LogLevel::from_str(name)?,
        None => settings.log_level,
    };
    logging::set_log_level(level);

    let log_dir = cli
        .log_dir
        .clone()
        .or_else(|| settings.log_dir.as_ref().map(PathBuf::from));
    if let Some(dir) = log_dir {
        logging::init_file_logging(&dir)?;
    }
    tlog!(LogLevel::Debug, "[poe_cli] settings from {}", config_path.display());

    let result = match cli.command {
        Commands::Encode {
            protocol,
            header,
            argument,
            value,
            target,
            return_id,
            data,
            base64,
        } => {
            let protocol = pick_protocol(protocol.as_deref(), &settings)?;
            let command = match protocol {
                ProtocolKind::SimpleSerial => OutgoingCommand::SimpleSerial(SimpleSerialCommand {
                    data: data.unwrap_or_default(),
                    end_package: None,
                }),
                ProtocolKind::PoeSerial => OutgoingCommand::PoeSerial(PoeSerialCommand::new(
                    Symbol::from(header.as_str()),
                    Symbol::from(argument.as_str()),
                    &value,
                )),
                ProtocolKind::PoeCanable | ProtocolKind::PoeCanableFd => {
                    let mut cmd = PoeCanableCommand::new(
                        Symbol::from(header.as_str()),
                        Symbol::from(argument.as_str()),
                        target,
                        return_id,
                        data.as_deref(),
                    );
                    cmd.convert_to_base64 = base64.then_some(1);
                    OutgoingCommand::PoeCanable(cmd)
                }
            };
            encode(protocol, &command, &settings)
        }
        Commands::Decode {
            protocol,
            separator,
        } => {
            let protocol = pick_protocol(protocol.as_deref(), &settings)?;
            decode(protocol, &separator, &settings)
        }
        Commands::Columns { protocol } => {
            let protocol = pick_protocol(protocol.as_deref(), &settings)?;
            let table = FrameTable::for_protocol(protocol, Dictionary::shared());
            println!("{}", table.schema_json()?);
            Ok(())
        }
    };

    logging::stop_file_logging();
    result
}

fn pick_protocol(name: Option<&str>, settings: &AppSettings) -> Result<ProtocolKind, String> {
    match name {
        Some(name) => ProtocolKind::from_str(name),
        None => Ok(settings.serial.protocol),
    }
}

fn encode(
    protocol: ProtocolKind,
    command: &OutgoingCommand,
    settings: &AppSettings,
) -> Result<(), String> {
    let codec = Codec::for_protocol(protocol, Dictionary::shared(), settings);
    let writes = codec.encode(command).map_err(|e| e.to_string())?;
    for data in writes {
        println!("{}  ({})", data.escape_ascii(), hex::encode_upper(&data));
    }
    Ok(())
}

fn decode(protocol: ProtocolKind, separator: &str, settings: &AppSettings) -> Result<(), String> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    let dict = Dictionary::shared();
    let mut codec = Codec::for_protocol(protocol, dict.clone(), settings);
    let mut renderer = RecordRenderer::new(FrameTable::for_protocol(protocol, dict));

    let print = |cells: Vec<poe_terminal_lib::RenderedCell>| {
        let line: Vec<String> = cells.iter().map(|c| c.plain()).collect();
        println!("{}", line.join(separator));
    };

    let mut errors = 0usize;
    for result in codec.decode(&raw) {
        match result {
            Ok(Decoded::Complete(record)) => print(renderer.render(&record)),
            Ok(Decoded::Incomplete) => {}
            Err(e) => {
                errors += 1;
                tlog!(LogLevel::Warning, "[poe_cli] {}", e);
            }
        }
    }
    if let Some(record) = codec.flush() {
        print(renderer.render(&record));
    }

    tlog!(LogLevel::Info, "[poe_cli] decoded {} bytes, {} error(s)", raw.len(), errors);
    Ok(())
}
