use crate::config::Config;
use crate::tracing_util::{self, Format};
use crate::utxo::{sort_utxos, total_amount};
use crate::{CandidateAddress, Scanner, Utxo};
use anyhow::{bail, Context, Result};
use bitcoin::{Amount, Network};
use clap::Parser;
use electrum_pool::{ClientPool, DefaultElectrumClientFactory};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "recovery-scan")]
#[command(about = "Find the unspent outputs of recovered wallet addresses using public Electrum servers")]
#[command(version)]
pub struct Arguments {
    #[arg(long, value_name = "FILE")]
    #[arg(help = "TOML configuration file, defaults apply when omitted")]
    pub config: Option<PathBuf>,

    #[arg(long, value_parser = parse_network)]
    #[arg(help = "Bitcoin network the addresses belong to")]
    pub network: Option<Network>,

    #[arg(long = "server", value_name = "URL")]
    #[arg(help = "Electrum server to use, can be given several times")]
    pub servers: Vec<Url>,

    #[arg(long)]
    #[arg(help = "Number of concurrent Electrum sessions")]
    pub pool_size: Option<usize>,

    #[arg(long)]
    #[arg(help = "Number of addresses looked up per scan task")]
    pub batch_size: Option<usize>,

    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "Time budget of a single scan task, retries included")]
    pub task_timeout: Option<u64>,

    #[arg(long)]
    #[arg(help = "Print the result and the logs as JSON")]
    pub json: bool,

    #[arg(long)]
    #[arg(help = "Enable debug logging")]
    pub debug: bool,

    #[arg(value_name = "ADDRESSES_FILE")]
    #[arg(help = "File with one address (and optionally its derivation path) per line, - for stdin")]
    pub addresses: PathBuf,
}

impl Arguments {
    /// The configuration file, if any, with the command line flags applied on top.
    pub fn effective_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::read(path).with_context(|| {
                format!("Failed to read config file at {}", path.display())
            })?,
            None => Config::default(),
        };

        if let Some(network) = self.network {
            config.network = network;
        }
        if !self.servers.is_empty() {
            config.electrum.servers = self.servers.clone();
        }
        if let Some(pool_size) = self.pool_size {
            config.electrum.pool_size = pool_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.scan.batch_size = batch_size;
        }
        if let Some(task_timeout) = self.task_timeout {
            config.scan.task_timeout = task_timeout;
        }

        Ok(config)
    }

    fn level_filter(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }

    fn format(&self) -> Format {
        if self.json {
            Format::Json
        } else {
            Format::Raw
        }
    }
}

fn parse_network(s: &str) -> Result<Network, String> {
    match s.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        _ => Err(format!(
            "Invalid network: {}. Must be bitcoin, testnet, signet or regtest",
            s
        )),
    }
}

/// Parse candidate addresses, one per line.
///
/// A line holds an address optionally followed by the derivation path it was derived
/// at. Blank lines and lines starting with `#` are skipped.
pub fn parse_addresses(reader: impl BufRead) -> Result<Vec<CandidateAddress>> {
    let mut addresses = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read addresses")?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let address = match (fields.next(), fields.next(), fields.next()) {
            (Some(address), None, None) => CandidateAddress::new(address),
            (Some(address), Some(path), None) => {
                CandidateAddress::new(address).with_derivation_path(path)
            }
            _ => bail!(
                "Line {} must contain an address and at most a derivation path",
                index + 1
            ),
        };

        addresses.push(address);
    }

    Ok(addresses)
}

fn read_addresses(path: &Path) -> Result<Vec<CandidateAddress>> {
    if path == Path::new("-") {
        return parse_addresses(io::stdin().lock());
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open address file {}", path.display()))?;
    parse_addresses(BufReader::new(file))
}

#[derive(serde::Serialize)]
struct Report<'a> {
    utxos: &'a [Utxo],
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    total: Amount,
}

/// Render the outputs as printed on `stdout`. The outputs must already be sorted.
pub fn render_report(utxos: &[Utxo], json: bool) -> Result<String> {
    let total = total_amount(utxos).context("Total amount of the found UTXOs overflows")?;

    if json {
        return Ok(serde_json::to_string_pretty(&Report { utxos, total })?);
    }

    if utxos.is_empty() {
        return Ok("No UTXOs found".to_string());
    }

    let mut report = String::new();
    for utxo in utxos {
        report.push_str(&utxo.to_string());
        if let Some(path) = utxo.address.derivation_path() {
            report.push_str(&format!(" ({})", path));
        }
        report.push('\n');
    }
    report.push_str(&format!("Total: {} in {} UTXOs", total, utxos.len()));

    Ok(report)
}

fn print_report(utxos: &mut [Utxo], json: bool) -> Result<()> {
    sort_utxos(utxos);
    let report = render_report(utxos, json)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", report).context("Failed to write report")?;

    Ok(())
}

/// Scan the addresses named on the command line and print what was found.
pub async fn run(args: Arguments) -> Result<()> {
    tracing_util::init(args.level_filter(), args.format())
        .context("Failed to initialize tracing")?;

    let config = args.effective_config()?;
    let addresses = read_addresses(&args.addresses)?;

    let pool_config = config.pool_config();
    let factory = DefaultElectrumClientFactory::new(pool_config.clone());
    let pool = ClientPool::new(pool_config.pool_size, &factory)
        .context("Failed to create Electrum client pool")?;
    let servers = Arc::new(config.server_provider());
    let scanner = Scanner::new(pool, servers, config.scan_config())?;

    info!(
        addresses = addresses.len(),
        network = %scanner.config().network,
        batch_size = scanner.config().batch_size,
        task_timeout = ?scanner.config().task_timeout,
        servers = scanner.servers().len(),
        "Starting address scan"
    );

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received Ctrl-C, canceling the scan");
                cancel.cancel();
            }
        }
    });

    let result = scanner.scan_with_cancel(&addresses, cancel).await;
    ctrl_c.abort();

    match result {
        Ok(mut utxos) => print_report(&mut utxos, args.json),
        Err(mut failure) => {
            if !failure.partial.is_empty() {
                warn!(
                    utxos = failure.partial.len(),
                    "Scan aborted, printing the UTXOs found so far"
                );
                print_report(&mut failure.partial, args.json)?;
            }

            Err(anyhow::Error::new(failure).context("Scanning phase failed"))
        }
    }
}
