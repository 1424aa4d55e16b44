use std::{error::Error, path::PathBuf, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};

use jukebot::{
    aliases::Aliases,
    cache::ResolverCache,
    channels::DjChannels,
    commands::Jukebox,
    config::Config,
    console::Console,
    http,
    player::Player,
    resolver::YtDlp,
    signal,
    speaker::Speaker,
    store::Store,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Every key is optional. A missing file means all defaults.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("config.toml"))]
    config: String,

    /// Directory for saved names, the resolver cache and DJ channels
    ///
    /// Overrides `data_dir` from the configuration file.
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath, env = "JUKEBOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the jukebox and serves the console until it closes or a signal
/// asks to exit. SIGHUP resets every session and keeps serving.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::from_file(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let store = Store::new(&config.data_dir);
    let resolver = Arc::new(YtDlp::from_config(&config));
    let cache = Arc::new(ResolverCache::load(resolver, store.clone(), config.resolve_timeout()).await);
    let probe = Arc::new(http::Client::new(&config)?);
    let speaker = Arc::new(Speaker::open(&config)?);
    let console = Arc::new(Console::new());

    let player = Arc::new(Player::new(console.clone(), speaker, cache, probe));
    let jukebox = Jukebox::new(
        console.clone(),
        player,
        Aliases::load(store.clone()).await,
        DjChannels::load(store).await,
    )
    .with_idle_timeout(config.idle_timeout());
    console.prepare(&jukebox).await;

    let mut signals = signal::Handler::new()?;
    let serving = console.run(&jukebox);
    tokio::pin!(serving);

    let result = loop {
        tokio::select! {
            // Prioritize signals.
            biased;

            signal = signals.recv() => {
                if signal.is_exit() {
                    info!("received {signal}, shutting down gracefully");
                    break Ok(());
                }

                info!("received {signal}, resetting all sessions");
                jukebox.shutdown().await;
            }

            result = &mut serving => {
                info!("console closed");
                break result;
            }
        }
    };

    jukebox.shutdown().await;
    result.map_err(Into::into)
}

/// Main entry point of the application.
#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
