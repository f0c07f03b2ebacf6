//! Wire protocol shared by the IPC server and client.
//!
//! A request is a single UTF-8 JSON object, e.g.
//! `{"cmd": "flash", "led": 3, "color": [10, 20, 30], "time": 200}`.
//! `led` defaults to 0, `color` to opaque white and `time` to 0 when omitted.
//! The reply is plain text: `"OK"` or `"Error: <reason>"` where the reason
//! names the validation step that failed (`json`, `cmd` or `params`).

use serde_json::{json, Map, Value};

use crate::strip::{Rgb, NUM_PIXELS};

/// Longest permitted flash duration. The flash delay blocks the server, so
/// the protocol caps it at one second.
pub const MAX_FLASH_MS: i64 = 1000;

/// Receive buffer size used for each read on both sides of the wire. A full
/// message always fits in one read; there is no framing beyond that.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Color applied when a request omits the `color` field.
pub const DEFAULT_COLOR: Rgb = [255, 255, 255];

/// A validated command, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    On { led: usize, color: Rgb },
    Off { led: usize },
    Flash { led: usize, color: Rgb, time_ms: u64 },
    /// Decoded cleanly but not one of the known kinds. Executes no LED
    /// operation; the server still answers `"OK"`.
    Unknown(String),
}

/// Which validation step a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// Body did not decode as a JSON object.
    Json,
    /// Decoded object has no `cmd` field.
    Cmd,
    /// A parameter is out of range or has the wrong shape.
    Params,
}

impl RequestError {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestError::Json => "Error: json",
            RequestError::Cmd => "Error: cmd",
            RequestError::Params => "Error: params",
        }
    }
}

/// Status token sent back to the client, one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ok,
    Err(RequestError),
}

impl Response {
    pub fn as_str(self) -> &'static str {
        match self {
            Response::Ok => "OK",
            Response::Err(e) => e.as_str(),
        }
    }
}

/// Decode and validate one request.
///
/// Validation is ordered: JSON decode first, then `cmd` presence, then
/// per-command parameters. The first failure wins. Fields a command does not
/// use are not validated; `off` accepts any `color`, and an unknown `cmd`
/// skips parameter validation entirely.
pub fn parse_request(raw: &[u8]) -> Result<Command, RequestError> {
    let value: Value = serde_json::from_slice(raw).map_err(|_| RequestError::Json)?;
    let request = value.as_object().ok_or(RequestError::Json)?;
    let cmd = request.get("cmd").ok_or(RequestError::Cmd)?;

    match cmd.as_str() {
        Some("on") => Ok(Command::On {
            led: led_param(request)?,
            color: color_param(request)?,
        }),
        Some("off") => Ok(Command::Off {
            led: led_param(request)?,
        }),
        Some("flash") => Ok(Command::Flash {
            led: led_param(request)?,
            color: color_param(request)?,
            time_ms: time_param(request)?,
        }),
        _ => {
            let name = cmd.as_str().map(str::to_owned).unwrap_or_else(|| cmd.to_string());
            Ok(Command::Unknown(name))
        }
    }
}

/// Encode an `on` request.
pub fn encode_on(led: usize, color: Rgb) -> String {
    json!({"cmd": "on", "led": led, "color": color}).to_string()
}

/// Encode an `off` request.
pub fn encode_off(led: usize) -> String {
    json!({"cmd": "off", "led": led}).to_string()
}

/// Encode a `flash` request.
pub fn encode_flash(led: usize, color: Rgb, time_ms: u64) -> String {
    json!({"cmd": "flash", "led": led, "color": color, "time": time_ms}).to_string()
}

/// Read an optional integer field. A present field must be a JSON number
/// exactly representable as `i64`; floats, strings, booleans and null fail.
fn int_field(request: &Map<String, Value>, name: &str) -> Result<Option<i64>, RequestError> {
    match request.get(name) {
        None => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or(RequestError::Params),
    }
}

fn led_param(request: &Map<String, Value>) -> Result<usize, RequestError> {
    match int_field(request, "led")? {
        None => Ok(0),
        Some(led) if (0..NUM_PIXELS as i64).contains(&led) => Ok(led as usize),
        Some(_) => Err(RequestError::Params),
    }
}

fn color_param(request: &Map<String, Value>) -> Result<Rgb, RequestError> {
    let value = match request.get("color") {
        None => return Ok(DEFAULT_COLOR),
        Some(value) => value,
    };

    let channels = value.as_array().ok_or(RequestError::Params)?;
    if channels.len() != 3 {
        return Err(RequestError::Params);
    }

    let mut color = [0u8; 3];
    for (slot, channel) in color.iter_mut().zip(channels) {
        let n = channel.as_i64().ok_or(RequestError::Params)?;
        *slot = u8::try_from(n).map_err(|_| RequestError::Params)?;
    }
    Ok(color)
}

fn time_param(request: &Map<String, Value>) -> Result<u64, RequestError> {
    match int_field(request, "time")? {
        None => Ok(0),
        Some(time) if (0..=MAX_FLASH_MS).contains(&time) => Ok(time as u64),
        Some(_) => Err(RequestError::Params),
    }
}
