pub mod cfg;
pub mod console;

pub use cfg::NodeConfig;
pub use console::{
    Command, CommandError, render_event, render_failures, render_peers, stdin_lines,
};
