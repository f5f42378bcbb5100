use anyhow::{Result, anyhow};
use log::{error, info, warn};
use notify::{Event, RecursiveMode, Watcher};
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::Ordering,
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use super::pipeline::{PipelineCmd, TrackingStatus, TrackingThread};
use super::runtime::{frames_socket_path, socket_path, termination_flag};
use crate::config::DaemonConfigState;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type Reply = Sender<Result<String, String>>;

enum IpcMsg {
    Reload(Reply),
    UseProfile(String, Reply),
    ProfileFilesChanged(Vec<PathBuf>),
    Pause,
    Resume,
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    let term = termination_flag()?;

    // sockets
    let sock = socket_path()?;
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());
    let frames_sock = frames_socket_path()?;

    // state
    let mut state = DaemonState::new()?;
    info!("daemon: active profile '{}'", state.cfg.active_name);

    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();

    // profile hot reload
    let tx_watch = tx_req.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
            let _ = tx_watch.send(IpcMsg::ProfileFilesChanged(ev.paths));
        }
        Ok(_) => {}
        Err(e) => warn!("profile watch error: {e}"),
    })?;
    watcher.watch(&state.cfg.profiles_dir, RecursiveMode::NonRecursive)?;

    // tracking thread
    let tracking = TrackingThread::start(state.cfg.profile.clone(), &frames_sock)?;
    state.tracking = tracking.status();

    // accept loop
    listener.set_nonblocking(true)?;
    loop {
        if term.load(Ordering::Relaxed) {
            info!("daemon: termination signal");
            break;
        }

        if let Ok((stream, _)) = listener.accept() {
            let tx = tx_req.clone();
            let st_snapshot = state.clone_shallow();
            thread::spawn(move || {
                if let Err(e) = handle_client(stream, st_snapshot, tx) {
                    error!("ipc client error: {e}");
                }
            });
        }

        let mut shutdown = false;
        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Reload(reply) => {
                    let _ = reply.send(reload(&mut state, &tracking));
                }
                IpcMsg::ProfileFilesChanged(paths) => {
                    let active = state.cfg.active_path();
                    if paths.iter().any(|p| *p == active) {
                        info!("daemon: {} changed on disk", active.display());
                        let _ = reload(&mut state, &tracking);
                    }
                }
                IpcMsg::UseProfile(name, reply) => {
                    let outcome = match state.cfg.set_active(&name) {
                        Ok(()) => {
                            tracking.send(PipelineCmd::UpdateProfile(state.cfg.profile.clone()));
                            info!("switched active profile to {}", state.cfg.active_name);
                            Ok(state.cfg.active_name.clone())
                        }
                        Err(e) => {
                            error!("use profile failed: {e:#}");
                            Err(format!("{e:#}"))
                        }
                    };
                    let _ = reply.send(outcome);
                }
                IpcMsg::Pause => tracking.send(PipelineCmd::Pause),
                IpcMsg::Resume => tracking.send(PipelineCmd::Resume),
                IpcMsg::Shutdown => shutdown = true,
            }
        }
        if shutdown {
            break;
        }

        thread::sleep(Duration::from_millis(5));
    }

    drop(watcher);
    tracking.shutdown();
    let _ = std::fs::remove_file(&sock);
    let _ = std::fs::remove_file(&frames_sock);
    info!("daemon: bye");
    Ok(())
}

/// Keeps the last good profile when the file on disk does not parse.
fn reload(state: &mut DaemonState, tracking: &TrackingThread) -> Result<String, String> {
    match state.cfg.reload() {
        Ok(()) => {
            tracking.send(PipelineCmd::UpdateProfile(state.cfg.profile.clone()));
            info!("profile reloaded");
            Ok(state.cfg.active_name.clone())
        }
        Err(e) => {
            error!("reload failed: {e:#}");
            Err(format!("{e:#}"))
        }
    }
}

fn await_reply(rx: mpsc::Receiver<Result<String, String>>) -> serde_json::Value {
    match rx.recv_timeout(REPLY_TIMEOUT) {
        Ok(Ok(name)) => serde_json::json!({"ok": true, "data": {"active_profile": name}}),
        Ok(Err(e)) => serde_json::json!({"ok": false, "error": e}),
        Err(_) => serde_json::json!({"ok": false, "error": "daemon did not answer in time"}),
    }
}

fn handle_client(mut stream: UnixStream, st: DaemonState, tx_req: Sender<IpcMsg>) -> Result<()> {
    let send = |msg: IpcMsg| {
        tx_req
            .send(msg)
            .map_err(|_| anyhow!("daemon is shutting down"))
    };
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = match op {
        "status" => {
            let tracking = st
                .tracking
                .lock()
                .map(|t| t.clone())
                .unwrap_or_default();
            serde_json::json!({"ok": true, "data": {
                "enabled": !tracking.paused,
                "active_profile": st.cfg.active_name,
                "profile_name": st.cfg.profile.meta.name,
                "show_camera": st.cfg.profile.session.display.show_camera,
                "socket": socket_path()?,
                "frames_socket": frames_socket_path()?,
                "tracking": tracking,
            }})
        }
        "reload" => {
            let (tx, rx) = mpsc::channel();
            send(IpcMsg::Reload(tx))?;
            await_reply(rx)
        }
        "use" => match req.get("profile").and_then(|v| v.as_str()) {
            Some(name) => {
                let (tx, rx) = mpsc::channel();
                send(IpcMsg::UseProfile(name.to_string(), tx))?;
                await_reply(rx)
            }
            None => serde_json::json!({"ok": false, "error": "missing 'profile'"}),
        },
        "list" => {
            let list = st.cfg.list_profiles();
            serde_json::json!({"ok": true, "data": {"profiles": list, "active": st.cfg.active_name}})
        }
        "doctor" => {
            let report = st.cfg.doctor_report();
            serde_json::json!({"ok": true, "data": report})
        }
        "pause" => {
            send(IpcMsg::Pause)?;
            serde_json::json!({"ok": true, "data": "paused"})
        }
        "resume" => {
            send(IpcMsg::Resume)?;
            serde_json::json!({"ok": true, "data": "resumed"})
        }
        "shutdown" => {
            send(IpcMsg::Shutdown)?;
            serde_json::json!({"ok": true, "data": "shutting down"})
        }
        _ => serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

struct DaemonState {
    cfg: DaemonConfigState,
    tracking: Arc<Mutex<TrackingStatus>>,
}

impl DaemonState {
    fn new() -> Result<Self> {
        let cfg = DaemonConfigState::load_or_install_default()?;
        Ok(Self {
            cfg,
            tracking: Arc::default(),
        })
    }

    fn clone_shallow(&self) -> Self {
        Self {
            cfg: self.cfg.clone(),
            tracking: self.tracking.clone(),
        }
    }
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "aircursor daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
