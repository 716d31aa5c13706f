//! Last-resort error channel: syslog over the local datagram socket.
//!
//! Messages are RFC 3164 formatted with facility `user` and severity `err`.
//! When the socket is unavailable the message goes to `tracing` on the
//! `syslog` target instead.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::application::ports::LastResort;

pub const DEFAULT_SOCKET: &str = "/dev/log";

/// `user` facility (1) * 8 + `err` severity (3).
const PRIORITY: u8 = 11;

#[derive(Debug, Clone)]
pub struct Syslog {
    socket: PathBuf,
    ident: String,
}

impl Default for Syslog {
    fn default() -> Self {
        Self::new(Path::new(DEFAULT_SOCKET))
    }
}

impl Syslog {
    #[must_use]
    pub fn new(socket: &Path) -> Self {
        Self {
            socket: socket.to_path_buf(),
            ident: "outpost".to_owned(),
        }
    }

    fn line(&self, message: &str) -> String {
        format!(
            "<{PRIORITY}>{} {}[{}]: {}",
            Local::now().format("%b %e %H:%M:%S"),
            self.ident,
            std::process::id(),
            message.replace('\n', " ")
        )
    }

    #[cfg(unix)]
    fn send(&self, message: &str) -> std::io::Result<()> {
        let socket = std::os::unix::net::UnixDatagram::unbound()?;
        socket.send_to(self.line(message).as_bytes(), &self.socket)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(&self, _message: &str) -> std::io::Result<()> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
    }
}

impl LastResort for Syslog {
    fn record(&self, message: &str) {
        if let Err(e) = self.send(message) {
            tracing::error!(target: "syslog", socket_error = %e, "{message}");
        } else {
            tracing::error!("{message}");
        }
    }
}
