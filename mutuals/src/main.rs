use mutuals::commands::command_argument_builder;
use mutuals::handlers::*;
use mutuals_core::print_banner;
use tracing::Level;

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // stderr keeps --json output clean
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_logging(chosen_command.get_count("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("count", primary_command)) => handle_count(primary_command).await,
        Some(("scan", primary_command)) => handle_scan(primary_command).await,
        Some(("status", primary_command)) => handle_status(primary_command),
        Some(("stop", primary_command)) => handle_stop(primary_command),
        Some(("clear", primary_command)) => handle_clear(primary_command),
        Some(("search", primary_command)) => handle_search(primary_command),
        Some(("export", primary_command)) => handle_export(primary_command),
        Some(("explore", primary_command)) => handle_explore(primary_command),
        Some(("config", primary_command)) => handle_config(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    }
}
