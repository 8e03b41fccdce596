pub mod control;
pub mod controller;
pub mod crawl;
pub mod data;
pub mod index;
pub mod model;
pub mod report;
pub mod search;
pub mod selection;
pub mod view;

use colored::Colorize;

pub use control::{Command, ControlSurface, Response};
pub use controller::{
    CrawlController, CrawlError, CrawlEvent, CrawlEventCallback, CrawlOutcome, CrawlState,
    SharedDatabase, create_event_channel,
};
pub use data::Database;
pub use index::{EdgeSet, GraphIndex, GraphIndexBuilder, SearchRecord};
pub use model::{CrawlProgress, Entity, Graph};
pub use selection::{SelectionHighlightEngine, SelectionState};
pub use view::GraphView;

pub fn print_banner() {
    let banner = r#"
  __  __       _               _
 |  \/  |_   _| |_ _   _  __ _| |___
 | |\/| | | | | __| | | |/ _` | / __|
 | |  | | |_| | |_| |_| | (_| | \__ \
 |_|  |_|\__,_|\__|\__,_|\__,_|_|___/
"#;
    println!("{}", banner.bright_blue().bold());
    println!(
        "  {} {}\n",
        "friend graph scanner".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
