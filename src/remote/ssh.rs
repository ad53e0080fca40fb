use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;

use async_trait::async_trait;
use ssh2::{ExtendedData, Session};
use tracing::{debug, warn};

use crate::config::SshConfig;
use crate::error::{ProvisionError, ProvisionResult};

use super::{AdminCommand, CommandExecutor};

/// Runs riak-admin over SSH. Each command gets its own TCP connection and session;
/// both are dropped when the blocking task returns, on success or failure.
#[derive(Clone)]
pub struct SshExecutor {
    config: Arc<SshConfig>,
}

impl SshExecutor {
    pub fn new(config: SshConfig) -> Self {
        Self { config: Arc::new(config) }
    }
}

/// Exit status plus stdout with stderr merged in.
struct Finished {
    status: i32,
    output: String,
}

fn authenticate(session: &Session, cfg: &SshConfig) -> ProvisionResult<()> {
    if let Some(key) = &cfg.private_key {
        if let Err(e) = session.userauth_pubkey_memory(&cfg.user, None, key, None) {
            warn!(user = %cfg.user, "ssh key authentication failed: {}", e);
        }
    }
    if !session.authenticated() {
        if let Some(pw) = &cfg.password {
            session.userauth_password(&cfg.user, pw).map_err(ProvisionError::transport)?;
        }
    }
    if !session.authenticated() {
        return Err(ProvisionError::Transport(format!("ssh authentication failed for user '{}'", cfg.user)));
    }
    Ok(())
}

fn exec_blocking(cfg: &SshConfig, line: &str) -> ProvisionResult<Finished> {
    let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port)).map_err(ProvisionError::transport)?;
    let mut session = Session::new().map_err(ProvisionError::transport)?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(ProvisionError::transport)?;
    authenticate(&session, cfg)?;

    let mut channel = session.channel_session().map_err(ProvisionError::transport)?;
    // stderr must be drained with stdout; merged, one read covers both.
    channel.handle_extended_data(ExtendedData::Merge).map_err(ProvisionError::transport)?;
    channel.exec(line).map_err(ProvisionError::transport)?;
    let mut output = String::new();
    channel.read_to_string(&mut output).map_err(ProvisionError::transport)?;
    channel.wait_close().map_err(ProvisionError::transport)?;
    let status = channel.exit_status().map_err(ProvisionError::transport)?;
    let _ = session.disconnect(None, "riakapi command done", None);
    Ok(Finished { status, output })
}

/// Zero exit gives the output back; anything else is a `RemoteCommand` failure.
fn command_outcome(shown: String, finished: Finished) -> ProvisionResult<String> {
    if finished.status != 0 {
        return Err(ProvisionError::RemoteCommand { command: shown, status: finished.status, output: finished.output.trim().to_string() });
    }
    Ok(finished.output)
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn run(&self, command: &AdminCommand) -> ProvisionResult<String> {
        let shown = command.to_string();
        let line = command.render(self.config.sudo);
        let cfg = self.config.clone();
        debug!(host = %cfg.host, port = cfg.port, command = %shown, "running remote command");

        let finished = tokio::task::spawn_blocking(move || exec_blocking(&cfg, &line))
            .await
            .map_err(ProvisionError::transport)??;

        debug!(command = %shown, status = finished.status, "remote command finished");
        command_outcome(shown, finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_zero_exit_keeps_merged_output() {
        let finished = Finished { status: 1, output: "Error: role_exists\n".into() };
        match command_outcome("riak-admin security add-user tsuru_a password=********".into(), finished) {
            Err(ProvisionError::RemoteCommand { status, output, command }) => {
                assert_eq!(status, 1);
                assert_eq!(output, "Error: role_exists");
                assert!(command.contains("********"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn zero_exit_returns_output_verbatim() {
        let finished = Finished { status: 0, output: "default (active)\n".into() };
        assert_eq!(command_outcome("riak-admin bucket-type list".into(), finished).unwrap(), "default (active)\n");
    }
}
