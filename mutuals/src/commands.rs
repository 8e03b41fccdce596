use crate::CLAP_STYLING;
use crate::handlers::DEFAULT_DATA_DIR;
use clap::builder::RangedU64ValueParser;
use clap::{arg, command};
use mutuals_core::controller::DEFAULT_REQUEST_DELAY;
use mutuals_core::search::DEFAULT_LIMIT;
use url::Url;

/// Requests are never sent faster than the default pace.
const MIN_REQUEST_DELAY_MS: u64 = DEFAULT_REQUEST_DELAY.as_millis() as u64;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("mutuals")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("mutuals")
        .about("Scan and explore your Discord friend graph")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").global(true))
        .arg(
            arg!(-v --"verbose" ... "Log more detail (-v info, -vv debug, -vvv trace)")
                .global(true),
        )
        .arg(
            arg!(-d --"data-dir" <PATH>)
                .help("Directory holding the mutuals database")
                .default_value(DEFAULT_DATA_DIR)
                .global(true),
        )
        .arg(
            arg!(--"token" <TOKEN>)
                .help("Discord token (falls back to --token-file, then MUTUALS_TOKEN)")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"token-file" <PATH>)
                .help("File containing the Discord token")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(--"api-base" <URL>)
                .help("API base URL")
                .required(false)
                .value_parser(clap::value_parser!(Url))
                .global(true),
        )
        .arg(
            arg!(--"delay-ms" <MILLIS>)
                .help("Pause between requests in milliseconds (at least 1000)")
                .value_parser(clap::value_parser!(u64).range(MIN_REQUEST_DELAY_MS..))
                .default_value("1000")
                .global(true),
        )
        .arg(
            arg!(--"timeout" <SECONDS>)
                .help("Request timeout in seconds")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("10")
                .global(true),
        )
        .arg(
            arg!(--"limit" <NUM>)
                .help("Scan at most NUM friends (0 scans everyone)")
                .required(false)
                .value_parser(clap::value_parser!(usize))
                .global(true),
        )
        .arg(
            arg!(--"with-servers")
                .help("Also fetch mutual servers and server nicknames (one extra request per friend)")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the mutuals database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("count")
                .about("Fetches the friend list and prints how many friends a scan would walk")
                .arg(arg!(--"json" "Print the raw response object").required(false)),
        )
        .subcommand(
            command!("scan")
                .about("Scans every friend's mutual friends and stores the graph")
                .arg(arg!(--"tui" "Watch the scan in the terminal monitor").required(false))
                .arg(arg!(--"json" "Print the raw response object").required(false))
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Also export the graph to a file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Export format for --output")
                        .value_parser(["text", "json", "dot", "csv"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("status")
                .about("Shows scan progress, the stored graph and recent scans")
                .arg(
                    arg!(-w --"watch")
                        .help("Watch a scan running in another process")
                        .required(false),
                )
                .arg(
                    arg!(--"history" <NUM>)
                        .help("Number of recent scans to list")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("5"),
                ),
        )
        .subcommand(command!("stop").about("Asks a running scan to stop and keep what it has"))
        .subcommand(
            command!("clear")
                .about("Deletes the stored graph and scan history, cancelling any running scan")
                .arg(arg!(-y --"yes" "Don't ask for confirmation").required(false)),
        )
        .subcommand(
            command!("search")
                .about("Fuzzy-searches the stored graph by name, handle and server nickname")
                .arg(arg!(<QUERY>).help("Search text").num_args(1..))
                .arg(
                    arg!(-n --"results" <NUM>)
                        .help("Maximum number of results (1 to 30)")
                        .value_parser(
                            RangedU64ValueParser::<usize>::new().range(1..=DEFAULT_LIMIT as u64),
                        )
                        .default_value("30"),
                ),
        )
        .subcommand(
            command!("export")
                .about("Exports the stored graph")
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .help("Export format")
                        .value_parser(["text", "json", "dot", "csv"])
                        .default_value("json"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write to a file instead of stdout")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"hide-names" "Leave names out of node labels (json only)")
                        .required(false),
                ),
        )
        .subcommand(command!("explore").about("Opens the interactive graph explorer"))
        .subcommand(command!("config").about("Prints the resolved configuration"))
}
