// # -----------------------------
// # crates/cli/src/main.rs
// # -----------------------------
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{self, ExitCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use gerrit_cl::config::{self, GerritConfig};
use gerrit_cl::logging::init_logging;
use gerrit_cl::{fatal_message, EventPrinter, OutputFormat};
use gerrit_events::{Event, EventNotifier, NotifierError, SshConnector, StopHandle};

/// How long a stop request may take before an interrupted process exits anyway.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(
    name = "gerrit-cl",
    version,
    long_version = gerrit_build_info::build_id(),
    about = "Command-line tools for Gerrit Code Review"
)]
struct Cli {
    /// Configuration file to use instead of the nearest .gerrit-cl.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Gerrit host name
    #[arg(long, global = true)]
    host: Option<String>,
    /// SSH user name
    #[arg(long, global = true)]
    username: Option<String>,
    #[arg(long, global = true, hide = true)]
    debug: bool,
    /// Log level (trace, debug, info, warn, error, off). Overrides RUST_LOG if set.
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print events from `gerrit stream-events` as they arrive
    StreamEvents(StreamEventsArgs),
}

#[derive(Args, Debug)]
struct StreamEventsArgs {
    /// SSH port of the Gerrit daemon
    #[arg(long)]
    port: Option<u16>,
    /// Private key to authenticate with
    #[arg(long, value_name = "PATH")]
    keyfile: Option<PathBuf>,
    /// Environment variable holding the key passphrase
    #[arg(long = "passphrase-env", value_name = "VAR")]
    passphrase_env: Option<String>,
    /// Refuse hosts missing from known_hosts
    #[arg(long = "strict-host-key-checking")]
    strict_host_key_checking: bool,
    /// Only print events of this type (repeatable)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    types: Vec<String>,
    /// Ask the server to only send events of this type (repeatable)
    #[arg(short = 's', long = "subscribe", value_name = "TYPE")]
    subscribe: Vec<String>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Stop after printing N events
    #[arg(short = 'n', long, value_name = "N")]
    count: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref(), cli.debug);
    debug!(
        "{}",
        gerrit_build_info::formatted_banner(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    );

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", fatal_message(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cwd = env::current_dir().context("cannot determine current directory")?;
    let home = gerrit_events::home_dir();
    let mut settings = config::load_all(cli.config.as_deref(), &cwd, home.as_deref())?;
    settings.apply_env(|key| env::var(key).ok())?;
    settings.merge(GerritConfig {
        host: cli.host,
        username: cli.username,
        ..Default::default()
    });

    match cli.command {
        Commands::StreamEvents(args) => stream_events(settings, args),
    }
}

fn stream_events(mut settings: GerritConfig, args: StreamEventsArgs) -> Result<ExitCode> {
    let passphrase = args
        .passphrase_env
        .as_deref()
        .map(|var| env::var(var).with_context(|| format!("environment variable {var} not set")))
        .transpose()?;
    settings.merge(GerritConfig {
        ssh_port: args.port,
        ssh_keyfile: args.keyfile,
        ssh_passphrase: passphrase,
        strict_host_key_checking: args.strict_host_key_checking.then_some(true),
        ..Default::default()
    });

    let mut params = settings.connection_params()?;
    params.subscriptions = args.subscribe;
    debug!("connection parameters: {:?}", params);

    let mut notifier = EventNotifier::with_connector(params, SshConnector::new());
    let stopper = notifier.stop_handle();
    let printer = Arc::new(EventPrinter::new(io::stdout(), args.format, args.count));

    if args.types.is_empty() {
        notifier.listen_all(print_callback(Arc::clone(&printer), stopper.clone()));
    } else {
        for kind in args.types {
            notifier.listen(kind, print_callback(Arc::clone(&printer), stopper.clone()));
        }
    }

    install_ctrlc_handler(stopper)?;

    notifier
        .start()
        .with_context(|| format!("cannot stream events from {}", notifier.params().host))?;
    debug!("{} events printed", printer.printed());
    if INTERRUPTED.load(Ordering::SeqCst) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_callback(
    printer: Arc<EventPrinter<io::Stdout>>,
    stopper: StopHandle,
) -> impl Fn(&Event) -> Result<()> + Send + Sync + 'static {
    move |event| {
        let done = printer.print(event).context("cannot write to stdout")?;
        if done {
            match stopper.stop() {
                Ok(()) | Err(NotifierError::NotRunning) => {}
                Err(err) => return Err(anyhow!(err)),
            }
        }
        Ok(())
    }
}

fn install_ctrlc_handler(stopper: StopHandle) -> Result<()> {
    ctrlc::set_handler(move || {
        if INTERRUPTED.swap(true, Ordering::SeqCst) {
            process::exit(1);
        }
        eprintln!("\nInterruption caught...");
        match stopper.stop() {
            Ok(()) => info!("stopping event stream"),
            Err(err) => debug!("stop after interruption: {}", err),
        }
        // Connecting cannot be interrupted; do not wait for it.
        thread::spawn(|| {
            thread::sleep(INTERRUPT_GRACE);
            process::exit(1);
        });
    })
    .context("install ctrl+c handler")
}
