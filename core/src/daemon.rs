use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, sleep_until};

use crate::cache::{ImageCacheSettings, ImageStore};
use crate::engine::{EngineSettings, HistoryEngine};
use crate::platform::{KeystrokePaste, SystemClipboard};
use crate::store::HistoryStore;
use crate::Config;

const MAX_IPC_MESSAGE_SIZE: usize = 4096;
const IPC_MAGIC: &[u8] = b"CLPS\x00\x01";

/// Control commands accepted over the daemon socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Copy { id: String, paste: bool },
    Pin(String),
    Unpin(String),
    Remove(String),
    Clear,
    Toggle,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, arg) = match line.split_once(':') {
            Some((verb, arg)) => (verb, Some(arg.trim())),
            None => (line, None),
        };

        let id = |arg: Option<&str>| -> Result<String> {
            match arg {
                Some(id) if !id.is_empty() => Ok(id.to_string()),
                _ => bail!("{} requires an entry identifier", verb),
            }
        };

        Ok(match verb {
            "COPY" => Command::Copy { id: id(arg)?, paste: false },
            "PASTE" => Command::Copy { id: id(arg)?, paste: true },
            "PIN" => Command::Pin(id(arg)?),
            "UNPIN" => Command::Unpin(id(arg)?),
            "REMOVE" => Command::Remove(id(arg)?),
            "CLEAR" => Command::Clear,
            "TOGGLE" => Command::Toggle,
            _ => bail!("Unknown command: {}", line),
        })
    }

    pub fn to_line(&self) -> String {
        match self {
            Command::Copy { id, paste: false } => format!("COPY:{}", id),
            Command::Copy { id, paste: true } => format!("PASTE:{}", id),
            Command::Pin(id) => format!("PIN:{}", id),
            Command::Unpin(id) => format!("UNPIN:{}", id),
            Command::Remove(id) => format!("REMOVE:{}", id),
            Command::Clear => "CLEAR".to_string(),
            Command::Toggle => "TOGGLE".to_string(),
        }
    }
}

pub fn encode_message(command: &Command) -> Vec<u8> {
    let line = command.to_line();
    let mut msg = Vec::with_capacity(IPC_MAGIC.len() + line.len());
    msg.extend_from_slice(IPC_MAGIC);
    msg.extend_from_slice(line.as_bytes());
    msg
}

pub fn decode_message(buf: &[u8]) -> Result<Command> {
    let body = buf
        .strip_prefix(IPC_MAGIC)
        .ok_or_else(|| anyhow!("Bad message header"))?;
    let line = std::str::from_utf8(body).context("Command is not UTF-8")?;
    Command::parse(line)
}

/// Owns the engine and drives it from one task: poll ticks, debounced
/// saves and socket commands are all handled by the same `select!` loop.
pub struct Daemon {
    engine: HistoryEngine,
    poll_interval: Duration,
    socket_path: PathBuf,
}

impl Daemon {
    pub fn new(config: &Config) -> Result<Self> {
        let clipboard = SystemClipboard::new()?;
        let engine = HistoryEngine::new(
            EngineSettings::from_config(config),
            Box::new(clipboard),
            Box::new(KeystrokePaste),
            ImageStore::new(ImageCacheSettings::from_config(config)),
            HistoryStore::new(config.history_path()),
        );
        Ok(Self::with_engine(engine, config))
    }

    pub fn with_engine(engine: HistoryEngine, config: &Config) -> Self {
        Self {
            engine,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            socket_path: config.socket_path(),
        }
    }

    pub fn engine(&self) -> &HistoryEngine {
        &self.engine
    }

    pub async fn run(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(32);

        let sock_path = self.socket_path.clone();
        let ipc_tx = tx.clone();
        let ipc_handle = tokio::spawn(async move {
            if let Err(e) = ipc_server(ipc_tx, sock_path).await {
                error!("Control socket failed: {:#}", e);
            }
        });

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Watching clipboard every {:?} ({} entries loaded)",
            self.poll_interval,
            self.engine.items().len()
        );

        loop {
            let deadline = self.engine.save_deadline();

            tokio::select! {
                _ = ticker.tick() => {
                    self.engine.poll();
                }

                _ = wait_for(deadline) => {
                    self.engine.flush_if_due(Instant::now());
                }

                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
            }
        }

        drop(tx);
        ipc_handle.abort();
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.socket_path);

        Ok(())
    }

    pub fn handle(&mut self, command: Command) {
        debug!("Handling {:?}", command);
        if let Err(e) = self.apply(command) {
            warn!("Command failed: {:#}", e);
        }
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Copy { id, paste } => {
                let id = self.engine.resolve(&id)?;
                if self.engine.copy_to_clipboard(id) && paste {
                    self.engine.paste_into_active_application();
                }
            }
            Command::Pin(id) => {
                let id = self.engine.resolve(&id)?;
                self.engine.pin(id);
            }
            Command::Unpin(id) => {
                let id = self.engine.resolve(&id)?;
                self.engine.unpin(id);
            }
            Command::Remove(id) => {
                let id = self.engine.resolve(&id)?;
                self.engine.remove(id);
            }
            Command::Clear => self.engine.clear_unpinned(),
            Command::Toggle => {
                self.engine.toggle_visibility();
                info!("Popover {}", if self.engine.is_visible() { "shown" } else { "hidden" });
            }
        }
        Ok(())
    }

    /// Write out a save that is still waiting for its debounce window.
    pub fn shutdown(&mut self) -> Result<()> {
        #[cfg(unix)]
        let _ = std::fs::remove_file(&self.socket_path);
        self.engine
            .flush_pending()
            .context("Failed to save history on shutdown")
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn ipc_server(tx: mpsc::Sender<Command>, sock_path: PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    let _ = std::fs::remove_file(&sock_path);
    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("Failed to bind {}", sock_path.display()))?;
    std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o700))?;

    loop {
        let (mut stream, _addr) = listener.accept().await?;

        // only accept commands from our own user
        #[cfg(target_os = "linux")]
        {
            match stream.peer_cred() {
                Ok(cred) => {
                    let current_uid = unsafe { libc::getuid() };
                    if cred.uid() != current_uid {
                        warn!("Rejected control connection from uid {}", cred.uid());
                        continue;
                    }
                }
                Err(_) => continue,
            }
        }

        let tx = tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_IPC_MESSAGE_SIZE];
            let n = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("Control read failed: {}", e);
                    return;
                }
            };

            match decode_message(&buf[..n]) {
                Ok(cmd) => {
                    let _ = tx.send(cmd).await;
                }
                Err(e) => warn!("Ignoring control message: {:#}", e),
            }
        });
    }
}

#[cfg(not(unix))]
async fn ipc_server(_tx: mpsc::Sender<Command>, _sock_path: PathBuf) -> Result<()> {
    bail!("Control socket is only supported on unix platforms")
}

pub async fn send_command(sock_path: &Path, command: &Command) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::io::AsyncWriteExt;
        use tokio::net::UnixStream;
        use tokio::time::timeout;

        let mut stream = timeout(Duration::from_secs(2), UnixStream::connect(sock_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon")?;

        let msg = encode_message(command);
        timeout(Duration::from_secs(2), stream.write_all(&msg))
            .await
            .context("Write timeout")?
            .context("Failed to send command")?;
        stream.shutdown().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (sock_path, command);
        bail!("Control socket is only supported on unix platforms")
    }
}
