mod dispatch;
mod pipeline;
mod runtime;
mod server;

pub use dispatch::{emit_once, parse_action};
pub use pipeline::{replay_file, run_foreground};
pub use runtime::termination_flag;
pub use server::{client_request, run_daemon};
