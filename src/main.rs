use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mbus_request::payload::decode_frame;
use mbus_request::util::hex::{format_hex_compact, parse_hex_lenient};
use mbus_request::{
    connect, connect_tcp, init_logger_with_debug, parse_frame, DecodeOutcome, DeviceAddress,
    FrameData, MBusSession, SerialConfig, TcpConfig,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mbus-request")]
#[command(about = "Read M-Bus meters over a serial line or a TCP gateway")]
struct Cli {
    /// Dump sent and received frames
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print the decoded data as JSON
    #[arg(short, long, global = true)]
    json: bool,

    /// Print records as plain numbers with their unit
    #[arg(short, long, global = true)]
    normalized: bool,

    /// Suppress records with non-numeric values
    #[arg(long, global = true)]
    onlynumval: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request data from a slave on a serial line
    RequestSerial {
        #[arg(short, long, default_value = "9600")]
        baudrate: u32,
        device: String,
        /// Primary address (0-250) or 16 digit secondary address mask
        address: String,
    },
    /// Request data from a slave behind a TCP gateway
    RequestTcp {
        host: String,
        port: u16,
        /// Primary address (0-250) or 16 digit secondary address mask
        address: String,
    },
    /// Decode a telegram stored as raw binary bytes
    Parse { file: PathBuf },
    /// Decode a telegram stored as hex text
    ParseHex { file: PathBuf },
}

struct OutputOptions {
    json: bool,
    normalized: bool,
    onlynumval: bool,
}

fn print_data(mut data: FrameData, options: &OutputOptions) -> Result<()> {
    if options.onlynumval {
        data.retain_numeric();
    }
    match (options.json, options.normalized) {
        (true, true) => println!("{}", data.to_normalized_json()?),
        (true, false) => println!("{}", data.to_json()?),
        (false, true) => {
            for record in data.normalized() {
                println!("{record}");
            }
        }
        (false, false) => print!("{data}"),
    }
    Ok(())
}

fn parse_binary_file(file: &Path) -> Result<Option<FrameData>> {
    let bytes =
        std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    decode_telegram(&bytes)
}

fn parse_hex_file(file: &Path) -> Result<Option<FrameData>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let bytes = parse_hex_lenient(&text)
        .with_context(|| format!("{} does not contain hex data", file.display()))?;
    decode_telegram(&bytes)
}

fn decode_telegram(bytes: &[u8]) -> Result<Option<FrameData>> {
    log::debug!("Parsing {}", format_hex_compact(bytes));

    match parse_frame(bytes) {
        DecodeOutcome::Complete { frame, consumed } => {
            if consumed < bytes.len() {
                log::warn!("Ignoring {} bytes after the frame", bytes.len() - consumed);
            }
            let data = decode_frame(&frame).context("failed to decode the frame payload")?;
            Ok(Some(data))
        }
        DecodeOutcome::NeedMoreBytes(n) => {
            println!("Incomplete frame: need {n} more bytes");
            Ok(None)
        }
        DecodeOutcome::Malformed(reason) => bail!("malformed frame: {reason}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger_with_debug(cli.debug);
    let options = OutputOptions {
        json: cli.json,
        normalized: cli.normalized,
        onlynumval: cli.onlynumval,
    };

    let data = match cli.command {
        Commands::RequestSerial {
            baudrate,
            device,
            address,
        } => {
            let address = DeviceAddress::parse(&address)
                .with_context(|| format!("invalid address {address}"))?;
            let handle = connect(&device, &SerialConfig::with_baudrate(baudrate))
                .with_context(|| format!("failed to open {device}"))?;
            let mut session = MBusSession::new(handle);
            session
                .read(&address)
                .await
                .context("failed to read the slave")?
        }
        Commands::RequestTcp {
            host,
            port,
            address,
        } => {
            let address = DeviceAddress::parse(&address)
                .with_context(|| format!("invalid address {address}"))?;
            let handle = connect_tcp(&TcpConfig::new(host.as_str(), port))
                .await
                .with_context(|| format!("failed to connect to {host}:{port}"))?;
            let mut session = MBusSession::new(handle);
            session
                .read(&address)
                .await
                .context("failed to read the slave")?
        }
        Commands::Parse { file } => match parse_binary_file(&file)? {
            Some(data) => data,
            None => return Ok(()),
        },
        Commands::ParseHex { file } => match parse_hex_file(&file)? {
            Some(data) => data,
            None => return Ok(()),
        },
    };

    print_data(data, &options)
}
