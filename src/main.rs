mod actions;
mod cli;
mod config;
mod engine;
mod error;
mod geometry;
mod gestures;
mod input;
mod ipc;
mod landmarks;
mod logging;
mod smoother;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
