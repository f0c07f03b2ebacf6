use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::protocol::{self, Command, Response, RECV_BUFFER_SIZE};
use crate::strip::{Rgb, Strip};

/// How often the accept and read loops wake to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the startup/shutdown indications stay lit before clearing.
const INDICATION_HOLD: Duration = Duration::from_secs(1);

/// IPC server owning the listening socket and the LED strip.
///
/// Fully synchronous: one connection at a time and, within a connection, one
/// request at a time. The strip is touched from this single thread only, so
/// pixel state needs no locking.
pub struct IpcServer<S: Strip> {
    listener: TcpListener,
    strip: S,
    running: Arc<AtomicBool>,
}

impl<S: Strip> IpcServer<S> {
    /// Bind the listening socket. A bind failure is fatal to the process.
    pub fn bind(config: &Config, strip: S) -> Result<Self> {
        let ip = if config.server_use_localhost {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            discover_lan_address()
        };
        let addr = SocketAddr::new(ip, config.port);

        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
        // Non-blocking so the accept loop can check the running flag.
        listener.set_nonblocking(true)?;

        Ok(IpcServer {
            listener,
            strip,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Get a clone of the running flag for signal handlers.
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Address the server actually listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections, one at a time, until the running flag
    /// clears. Socket errors on a connection end only that connection; the
    /// server resumes listening.
    pub fn run(&mut self) -> Result<()> {
        info!("Listening on {}", self.listener.local_addr()?);

        while self.running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    info!("Client connected from {}", peer_addr);

                    if let Err(e) = self.serve_connection(stream) {
                        warn!("Connection to {} failed: {}", peer_addr, e);
                    }

                    info!("Client disconnected");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    // No connection ready, sleep briefly to avoid busy-waiting
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }

        Ok(())
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Each non-empty read is treated as exactly one complete command
    /// message: no length prefix, no delimiter, no buffering across reads.
    /// The read timeout only keeps the loop responsive to shutdown; an idle
    /// client holds the connection (and the whole server) indefinitely.
    fn serve_connection(&mut self, mut stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        while self.running.load(Ordering::Relaxed) {
            let n = match stream.read(&mut buffer) {
                // Peer closed the connection
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            debug!("Received {:?}", String::from_utf8_lossy(&buffer[..n]));
            let response = self.handle_request(&buffer[..n]);
            stream.write_all(response.as_str().as_bytes())?;
        }

        Ok(())
    }

    /// Decode, validate and execute one request, producing the status token
    /// for the reply. Never fatal: every failure is reported in the token.
    fn handle_request(&mut self, raw: &[u8]) -> Response {
        let command = match protocol::parse_request(raw) {
            Ok(command) => command,
            Err(e) => return Response::Err(e),
        };

        let result = match command {
            Command::On { led, color } => self.execute_on(led, color),
            Command::Off { led } => self.execute_on(led, [0, 0, 0]),
            Command::Flash { led, color, time_ms } => self.execute_flash(led, color, time_ms),
            Command::Unknown(name) => {
                debug!("Ignoring unrecognized command {:?}", name);
                Ok(())
            }
        };

        // The token set is closed, so a driver failure cannot be reported on
        // the wire; it is logged and the request still answers OK.
        if let Err(e) = result {
            error!("LED driver error: {:#}", e);
        }
        Response::Ok
    }

    /// Write a color to one pixel and flush, as a single visible update.
    fn execute_on(&mut self, led: usize, color: Rgb) -> Result<()> {
        self.strip.set_pixel(led, color[0], color[1], color[2]);
        self.strip.show()
    }

    /// Override the pixel, hold for the duration, then restore the color the
    /// pixel had before. The sleep runs on the serve thread: the server is
    /// unresponsive until the flash completes, at most one second.
    fn execute_flash(&mut self, led: usize, color: Rgb, time_ms: u64) -> Result<()> {
        let (previous, _) = self.strip.get_pixel(led);
        // The restore runs even when the override flush fails; the override
        // must never outlive the flash.
        let overridden = self.execute_on(led, color);
        thread::sleep(Duration::from_millis(time_ms));
        self.execute_on(led, previous).and(overridden)
    }

    /// Visible "ready" indication: all pixels white, hold, clear.
    pub fn startup_indication(&mut self) -> Result<()> {
        self.indicate([255, 255, 255])
    }

    /// Visible "exiting" indication: all pixels red, hold, clear.
    pub fn shutdown_indication(&mut self) -> Result<()> {
        self.indicate([255, 0, 0])
    }

    fn indicate(&mut self, color: Rgb) -> Result<()> {
        self.strip.set_all_pixels(color[0], color[1], color[2]);
        self.strip.show()?;
        thread::sleep(INDICATION_HOLD);
        self.strip.set_all_pixels(0, 0, 0);
        self.strip.show()
    }
}

/// Discover the host's LAN address by connecting a UDP socket to a public
/// address and reading the local socket name; no packet is sent. Falls back
/// to loopback when the host has no route.
fn discover_lan_address() -> IpAddr {
    let discovered = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    });

    match discovered {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Cannot determine host IP address, falling back to loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strip::MemoryStrip;
    use std::sync::Mutex;
    use std::time::Instant;

    fn test_server() -> IpcServer<MemoryStrip> {
        let config = Config {
            port: 0,
            ..Config::default()
        };
        IpcServer::bind(&config, MemoryStrip::new(5)).unwrap()
    }

    #[test]
    fn on_sets_and_flushes_the_pixel() {
        let mut server = test_server();

        let response = server.handle_request(br#"{"cmd":"on","led":3,"color":[10,20,30]}"#);
        assert_eq!(response.as_str(), "OK");

        let (color, _) = server.strip.get_pixel(3);
        assert_eq!(color, [10, 20, 30]);
        assert_eq!(server.strip.shown(3), [10, 20, 30]);
    }

    #[test]
    fn on_is_idempotent() {
        let mut server = test_server();

        server.handle_request(br#"{"cmd":"on","led":5,"color":[7,8,9]}"#);
        let after_once = server.strip.get_pixel(5);
        server.handle_request(br#"{"cmd":"on","led":5,"color":[7,8,9]}"#);
        assert_eq!(server.strip.get_pixel(5), after_once);
    }

    #[test]
    fn off_equals_on_with_black() {
        let mut server = test_server();

        server.handle_request(br#"{"cmd":"on","led":2,"color":[50,60,70]}"#);
        let response = server.handle_request(br#"{"cmd":"off","led":2}"#);
        assert_eq!(response.as_str(), "OK");

        let (color, _) = server.strip.get_pixel(2);
        assert_eq!(color, [0, 0, 0]);
        assert_eq!(server.strip.shown(2), [0, 0, 0]);
    }

    #[test]
    fn flash_blocks_and_restores_the_prior_color() {
        let mut server = test_server();
        server.handle_request(br#"{"cmd":"on","led":3,"color":[1,2,3]}"#);

        let start = Instant::now();
        let response =
            server.handle_request(br#"{"cmd":"flash","led":3,"color":[10,20,30],"time":50}"#);
        assert_eq!(response.as_str(), "OK");
        assert!(start.elapsed() >= Duration::from_millis(50));

        // Restored to the prior color, not to black.
        let (color, _) = server.strip.get_pixel(3);
        assert_eq!(color, [1, 2, 3]);
    }

    #[test]
    fn flash_with_zero_duration_restores_immediately() {
        let mut server = test_server();

        let response = server.handle_request(br#"{"cmd":"flash","led":0,"color":[9,9,9],"time":0}"#);
        assert_eq!(response.as_str(), "OK");

        let (color, _) = server.strip.get_pixel(0);
        assert_eq!(color, [0, 0, 0]);
    }

    /// MemoryStrip whose `show()` fails a set number of times, then recovers.
    struct FailingShowStrip {
        inner: MemoryStrip,
        failures_left: u32,
    }

    impl Strip for FailingShowStrip {
        fn set_pixel(&mut self, pixel: usize, red: u8, green: u8, blue: u8) {
            self.inner.set_pixel(pixel, red, green, blue);
        }

        fn set_all_pixels(&mut self, red: u8, green: u8, blue: u8) {
            self.inner.set_all_pixels(red, green, blue);
        }

        fn get_pixel(&self, pixel: usize) -> (Rgb, f32) {
            self.inner.get_pixel(pixel)
        }

        fn show(&mut self) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(anyhow::anyhow!("strip unavailable"));
            }
            self.inner.show()
        }
    }

    #[test]
    fn flash_restores_even_when_the_override_flush_fails() {
        let mut inner = MemoryStrip::new(5);
        inner.set_pixel(3, 1, 2, 3);
        inner.show().unwrap();

        let config = Config {
            port: 0,
            ..Config::default()
        };
        let strip = FailingShowStrip { inner, failures_left: 1 };
        let mut server = IpcServer::bind(&config, strip).unwrap();

        let response =
            server.handle_request(br#"{"cmd":"flash","led":3,"color":[10,20,30],"time":0}"#);
        assert_eq!(response.as_str(), "OK");

        // The override flush failed, but the prior color is staged and shown
        // again, not left overridden.
        let (color, _) = server.strip.get_pixel(3);
        assert_eq!(color, [1, 2, 3]);
        assert_eq!(server.strip.inner.shown(3), [1, 2, 3]);
    }

    #[test]
    fn rejected_and_unknown_requests_leave_the_strip_untouched() {
        let mut server = test_server();
        server.handle_request(br#"{"cmd":"on","led":1,"color":[5,5,5]}"#);

        let response = server.handle_request(br#"{"cmd":"on","led":1,"color":[999,0,0]}"#);
        assert_eq!(response.as_str(), "Error: params");

        let response = server.handle_request(br#"{"cmd":"dim","led":1,"color":[0,0,0]}"#);
        assert_eq!(response.as_str(), "OK");

        let (color, _) = server.strip.get_pixel(1);
        assert_eq!(color, [5, 5, 5]);
    }

    /// MemoryStrip behind a lock, so a test can watch pixel state while the
    /// server runs on another thread.
    #[derive(Clone)]
    struct SharedStrip(Arc<Mutex<MemoryStrip>>);

    impl SharedStrip {
        fn new() -> Self {
            SharedStrip(Arc::new(Mutex::new(MemoryStrip::new(5))))
        }

        fn staged(&self, pixel: usize) -> Rgb {
            self.0.lock().unwrap().get_pixel(pixel).0
        }
    }

    impl Strip for SharedStrip {
        fn set_pixel(&mut self, pixel: usize, red: u8, green: u8, blue: u8) {
            self.0.lock().unwrap().set_pixel(pixel, red, green, blue);
        }

        fn set_all_pixels(&mut self, red: u8, green: u8, blue: u8) {
            self.0.lock().unwrap().set_all_pixels(red, green, blue);
        }

        fn get_pixel(&self, pixel: usize) -> (Rgb, f32) {
            self.0.lock().unwrap().get_pixel(pixel)
        }

        fn show(&mut self) -> Result<()> {
            self.0.lock().unwrap().show()
        }
    }

    fn spawn_server(strip: SharedStrip) -> (SocketAddr, Arc<AtomicBool>, thread::JoinHandle<()>) {
        let config = Config {
            port: 0,
            ..Config::default()
        };
        let mut server = IpcServer::bind(&config, strip).unwrap();
        let addr = server.local_addr().unwrap();
        let running = server.get_running_flag();
        let handle = thread::spawn(move || server.run().unwrap());
        (addr, running, handle)
    }

    fn read_response(stream: &mut TcpStream) -> String {
        stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = stream.read(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn send_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request.as_bytes()).unwrap();
        read_response(&mut stream)
    }

    #[test]
    fn serves_sequential_requests_and_reconnects() {
        let strip = SharedStrip::new();
        let (addr, running, handle) = spawn_server(strip.clone());

        // Two requests on one connection; a bad request keeps it open.
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(br#"{"cmd":"on","led":1,"color":[9,9,9]}"#)
            .unwrap();
        assert_eq!(read_response(&mut stream), "OK");
        stream.write_all(b"garbage").unwrap();
        assert_eq!(read_response(&mut stream), "Error: json");
        drop(stream);

        // The server returns to listening once the peer closes.
        assert_eq!(send_request(addr, r#"{"cmd":"off","led":1}"#), "OK");
        assert_eq!(strip.staged(1), [0, 0, 0]);

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn flash_is_visible_then_restored_end_to_end() {
        let strip = SharedStrip::new();
        let (addr, running, handle) = spawn_server(strip.clone());

        // Pixel 3 starts black via an explicit on.
        assert_eq!(send_request(addr, r#"{"cmd":"on","led":3,"color":[0,0,0]}"#), "OK");

        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(br#"{"cmd":"flash","led":3,"color":[10,20,30],"time":300}"#)
            .unwrap();

        // The override must become visible while the flash delay runs.
        let deadline = Instant::now() + Duration::from_secs(2);
        while strip.staged(3) != [10, 20, 30] {
            assert!(Instant::now() < deadline, "flash override never became visible");
            thread::sleep(Duration::from_millis(5));
        }

        // The reply arrives only after the restore.
        assert_eq!(read_response(&mut stream), "OK");
        assert_eq!(strip.staged(3), [0, 0, 0]);

        running.store(false, Ordering::Relaxed);
        drop(stream);
        handle.join().unwrap();
    }
}
