use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf, process::Command};

use crate::actions::UinputSink;
use crate::config::{DaemonConfigState, Profile};
use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("aircursor: started daemon (pid={})", child.id());
            Ok(())
        }

        Some(op @ ("stop" | "status" | "reload" | "list" | "doctor" | "pause" | "resume")) => {
            let op = if op == "stop" { "shutdown" } else { op };
            let r = ipc::client_request(serde_json::json!({ "op": op }))?;
            print_response(&r);
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: aircursor use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op":"use","profile":name}))?;
            print_response(&r);
            Ok(())
        }

        Some("run") => {
            let profile = select_profile(&mut pargs)?;
            let term = ipc::termination_flag()?;
            ipc::run_foreground(profile, term)
        }

        Some("replay") => {
            let profile = select_profile(&mut pargs)?;
            let dry_run = pargs.contains("--dry-run");
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: aircursor replay <frames.jsonl> [--dry-run]"))?;
            ipc::replay_file(profile, path, dry_run)
        }

        Some("emit") => {
            let arg: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: aircursor emit <action>"))?;
            let action = ipc::parse_action(&arg)?;
            let screen = DaemonConfigState::load_or_install_default()?
                .profile
                .session
                .screen;
            let sink = UinputSink::new(screen.width, screen.height)?;
            ipc::emit_once(sink, action)?;
            println!("ok: {arg}");
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

/// `--profile <name>` or the active profile.
fn select_profile(pargs: &mut Arguments) -> Result<Profile> {
    let name: Option<String> = pargs.opt_value_from_str("--profile")?;
    match name {
        Some(name) => DaemonConfigState::load_named(&name),
        None => Ok(DaemonConfigState::load_or_install_default()?.profile),
    }
}

fn print_help() {
    println!(
        r#"aircursor - drive the pointer with hand gestures

USAGE:
  aircursor help [command]                Show general or command-specific help
  aircursor start                         Start the daemon
  aircursor stop                          Stop the daemon
  aircursor status                        Show daemon and tracking state
  aircursor reload                        Reload active profile
  aircursor use <name>                    Switch active profile
  aircursor list                          List profiles
  aircursor doctor                        Diagnose uinput permissions
  aircursor pause                         Stop interpreting frames
  aircursor resume                        Resume interpreting frames
  aircursor run [--profile <name>]        Track frames read from stdin
  aircursor replay <file> [--dry-run]     Play a recorded frame stream
  aircursor emit <action>                 Emit one pointer action

GESTURES:
  pinch (thumb to index)      click, hold to drag
  ok sign                     same as pinch
  pinky to wrist              right click
  index + middle together     scroll with vertical motion

TIPS:
  - Profiles: ~/.config/aircursor/profiles
  - Active profile pointer: ~/.config/aircursor/active
  - Perception socket: ~/.local/run/aircursor-frames.sock
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: aircursor start\nStarts the background daemon."),
        "stop" => println!(
            "usage: aircursor stop\nReleases any held button and stops the running daemon."
        ),
        "status" => println!(
            "usage: aircursor status\nShows active profile, sockets, pointer state and frame counters."
        ),
        "reload" => println!(
            "usage: aircursor reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: aircursor use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: aircursor list\nLists available profiles."),
        "doctor" => println!(
            "usage: aircursor doctor\nChecks /dev/uinput and input group membership."
        ),
        "pause" | "resume" => println!(
            "usage: aircursor {cmd}\nPauses or resumes tracking without dropping the perception stream."
        ),
        "run" => println!(
            "usage: aircursor run [--profile <name>]\nReads JSON-lines landmark frames from stdin until EOF or Ctrl-C."
        ),
        "replay" => println!(
            "usage: aircursor replay <frames.jsonl> [--profile <name>] [--dry-run]\nFeeds a recording through a fresh session and prints the delivered actions.\n--dry-run uses a no-op pointer device."
        ),
        "emit" => println!(
            "usage:\n  aircursor emit click|double|right\n  aircursor emit scroll:<steps>\n  aircursor emit move:<x>,<y>"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
