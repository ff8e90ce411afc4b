use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};

use petri::color_utils::{colors, init_color_config, symbols};
use petri::config::{CountCommand, CountConfig, GlobalArgs, TrackCommand, TrackConfig};
use petri::still_processing::run_still_counting;
use petri::timelapse_processing::run_timelapse_tracking;
use std::io::Write;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Track colony counts per dish across time-lapse directories
    Track(TrackCommand),

    /// Count colonies per dish in independent still images
    Count(CountCommand),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "petri")]
#[command(about = "Colony growth tracking for petri dish time-lapses")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    let base_level = verbosity.log_level_filter();
    let adjusted_level = match base_level {
        log::LevelFilter::Off => log::LevelFilter::Off, // -qq -> OFF
        log::LevelFilter::Error => log::LevelFilter::Warn, // default -> WARN
        log::LevelFilter::Warn => log::LevelFilter::Info, // -v -> INFO
        log::LevelFilter::Info => log::LevelFilter::Debug, // -vv -> DEBUG
        log::LevelFilter::Debug => log::LevelFilter::Trace, // -vvv -> TRACE
        log::LevelFilter::Trace => log::LevelFilter::Trace, // -vvvv -> TRACE (max)
    };

    // clap-verbosity-flag reports -q and the default alike
    if verbosity.is_silent() {
        log::LevelFilter::Error // -q -> ERROR
    } else {
        adjusted_level
    }
}

fn describe_sources(sources: &[String]) -> String {
    if sources.len() == 1 {
        sources[0].clone()
    } else {
        format!("{} inputs", sources.len())
    }
}

fn main() {
    let cli = Cli::parse();

    init_color_config(cli.global.no_color);

    // If user didn't pass -v/-q and RUST_LOG is set, honor the env var.
    let use_env = !cli.global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let level_filter = get_log_level_from_verbosity(cli.global.verbosity.clone());

        let mut b = Builder::new();
        b.filter_level(level_filter);
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();

    match &cli.command {
        Some(Commands::Track(track_cmd)) => {
            let internal_config = match TrackConfig::from_args(cli.global.clone(), track_cmd.clone()) {
                Ok(config) => config,
                Err(e) => {
                    error!("{}Invalid parameters: {e}", symbols::operation_failed());
                    std::process::exit(1);
                }
            };

            info!(
                "{}Time-lapse tracking: {} | mode: {:?} | dishes: {}",
                symbols::tracking_start(),
                describe_sources(&track_cmd.sources),
                internal_config.params.segmentation.mode,
                internal_config.params.n_dishes
            );
            if track_cmd.debug_dump_images {
                info!("   Outputs: metadata, debug images");
            }

            if let Err(e) = run_timelapse_tracking(internal_config) {
                error!("{}Tracking failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Count(count_cmd)) => {
            let internal_config = match CountConfig::from_args(cli.global.clone(), count_cmd.clone()) {
                Ok(config) => config,
                Err(e) => {
                    error!("{}Invalid parameters: {e}", symbols::operation_failed());
                    std::process::exit(1);
                }
            };

            info!(
                "{}Colony counting: {} | mode: {:?} | dishes: {}",
                symbols::counting_start(),
                describe_sources(&count_cmd.sources),
                internal_config.params.segmentation.mode,
                internal_config.params.n_dishes
            );
            if count_cmd.debug_dump_images {
                info!("   Outputs: metadata, debug images");
            }

            if let Err(e) = run_still_counting(internal_config) {
                error!("{}Counting failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Version) => {
            println!("petri v{}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            // Show help if no command specified
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                eprintln!("{e}");
            }
        }
    }
}
