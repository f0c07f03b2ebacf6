use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::debug;

use crate::config::Config;
use crate::protocol::{encode_flash, encode_off, encode_on, RECV_BUFFER_SIZE};
use crate::strip::Rgb;

/// Thin IPC client: one connection, one request, one response, bounded by
/// the configured timeout at every step. Transport failures surface with a
/// distinct cause each and are never retried.
pub struct IpcClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        IpcClient { addr, timeout }
    }

    /// Build a client from the configuration's host selection, port and
    /// timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = config.client_host();
        let addr = (host, config.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid server address {}:{}", host, config.port))?
            .next()
            .ok_or_else(|| anyhow!("Server address {}:{} did not resolve", host, config.port))?;

        debug!("Will connect to {}", addr);
        Ok(IpcClient::new(addr, config.comms_timeout()))
    }

    /// Turn one LED on with the given color.
    pub fn on(&self, led: usize, color: Rgb) -> Result<String> {
        self.send(encode_on(led, color).as_bytes())
    }

    /// Turn one LED off.
    pub fn off(&self, led: usize) -> Result<String> {
        self.send(encode_off(led).as_bytes())
    }

    /// Flash one LED for `time_ms` milliseconds. The server replies only
    /// after the flash completes, so the response can take up to a second.
    pub fn flash(&self, led: usize, color: Rgb, time_ms: u64) -> Result<String> {
        self.send(encode_flash(led, color, time_ms).as_bytes())
    }

    /// Perform a single request/response round trip.
    pub fn send(&self, message: &[u8]) -> Result<String> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout)
            .context("Unable to connect to server")?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_read_timeout(Some(self.timeout))?;

        debug!("Sending {:?}", String::from_utf8_lossy(message));
        stream.write_all(message).context("Send timeout")?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let n = stream
            .read(&mut buffer)
            .context("Receive response timeout")?;
        Ok(String::from_utf8_lossy(&buffer[..n]).into_owned())
    }
}
