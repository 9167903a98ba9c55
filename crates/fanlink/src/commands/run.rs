//! `fanlink run`: host the communicator and drive it from stdin.
//!
//! Each stdin line is one JSON command vector, e.g.
//! `{"op": "dc_single", "args": {"dc": 0.5, "target": {"all": {"selection": "1111"}}}}`.
//! Blank lines and lines starting with `#` are skipped.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use fanlink_core::{
    Command, CommandVector, Communicator, CommunicatorConfig, DeviceSummary, NetworkStatus,
    Output, Services,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs, WatchKind};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = build_config(&args, global)?;
    let services = Services::new(config.period);
    let communicator = Communicator::new(config, services).await?;
    communicator.start().await?;
    info!(listener = %communicator.listener_addr(), "fanlink running");

    let result = drive(&communicator, &args, global).await;
    communicator.stop().await;
    result
}

/// Profile settings with command-line overrides applied.
fn build_config(args: &RunArgs, global: &GlobalOpts) -> Result<CommunicatorConfig, CliError> {
    let cfg = fanlink_config::load_config()?;
    let (name, profile) = cfg.profile(global.profile.as_deref())?;
    let passcode = match args.passcode {
        Some(ref passcode) => SecretString::from(passcode.clone()),
        None => fanlink_config::resolve_passcode(&profile, &name),
    };
    let mut config = fanlink_config::communicator_config(&profile, passcode)?;

    if let Some(ip) = args.bind_ip {
        config.bind_ip = ip;
    }
    if let Some(port) = args.listener_port {
        config.listener_port = port;
    }
    if let Some(ref ip) = args.broadcast_ip {
        config.broadcast_ip.clone_from(ip);
    }
    if let Some(port) = args.broadcast_port {
        config.broadcast_port = port;
    }
    if let Some(ms) = args.period_ms {
        config.period = Duration::from_millis(ms);
    }
    debug!(profile = %name, "communicator configuration resolved");
    Ok(config)
}

async fn drive(
    communicator: &Communicator,
    args: &RunArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut outputs = communicator.subscribe();
    let mut view = View::new(args.watch.clone(), global.output_format(), global.quiet);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let read_stdin = !args.no_input;

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            () = communicator.stopped() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            output = outputs.recv() => match output {
                Ok(output) => view.show(&output),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output consumer lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if read_stdin => match line? {
                Some(line) => submit_line(communicator, &line).await,
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            () = &mut deadline => break,
        }
    }
    Ok(())
}

async fn submit_line(communicator: &Communicator, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let vector: CommandVector = match serde_json::from_str(line) {
        Ok(vector) => vector,
        Err(e) => {
            warn!(error = %e, "ignoring malformed command line");
            return;
        }
    };
    let command = match Command::try_from(vector) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "command rejected");
            return;
        }
    };
    let opcode = command.opcode();
    match communicator.execute(command).await {
        Ok(_) => debug!(%opcode, "command applied"),
        Err(e) => warn!(%opcode, error = %e, "command failed"),
    }
}

// ── Rendering ────────────────────────────────────────────────────────

/// Renders the watched outputs. Registry and network snapshots are
/// republished every period; only changes are shown.
struct View {
    watch: Vec<WatchKind>,
    format: OutputFormat,
    quiet: bool,
    last_registry: Option<Arc<Vec<DeviceSummary>>>,
    last_network: Option<NetworkStatus>,
}

impl View {
    fn new(watch: Vec<WatchKind>, format: OutputFormat, quiet: bool) -> Self {
        Self {
            watch,
            format,
            quiet,
            last_registry: None,
            last_network: None,
        }
    }

    fn show(&mut self, out: &Output) {
        let changed = match out {
            Output::Registry(devices) => {
                let changed = self
                    .last_registry
                    .as_ref()
                    .is_none_or(|last| **last != **devices);
                self.last_registry = Some(Arc::clone(devices));
                changed && self.watch.contains(&WatchKind::Registry)
            }
            Output::Network(status) => {
                let changed = self.last_network.as_ref() != Some(status);
                self.last_network = Some(status.clone());
                changed && self.watch.contains(&WatchKind::Network)
            }
            Output::Feedback(_) => self.watch.contains(&WatchKind::Feedback),
            Output::Performance(_) => self.watch.contains(&WatchKind::Performance),
        };
        if changed {
            output::print_output(&output::render_output(self.format, out), self.quiet);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn network(port: u16) -> Output {
        Output::Network(NetworkStatus {
            connected: true,
            listener_ip: "127.0.0.1".parse().unwrap(),
            listener_port: port,
            broadcast_ip: "<broadcast>".into(),
            broadcast_port: 65000,
            broadcast_mode: fanlink_core::BroadcastMode::Broadcast,
            broadcasting: true,
        })
    }

    #[test]
    fn test_view_tracks_changes_even_when_unwatched() {
        let mut view = View::new(vec![WatchKind::Registry], OutputFormat::Plain, true);
        view.show(&network(1));
        assert_eq!(view.last_network.as_ref().unwrap().listener_port, 1);
        view.show(&network(2));
        assert_eq!(view.last_network.as_ref().unwrap().listener_port, 2);

        let empty = Arc::new(Vec::new());
        view.show(&Output::Registry(Arc::clone(&empty)));
        assert!(view.last_registry.is_some());
    }
}
