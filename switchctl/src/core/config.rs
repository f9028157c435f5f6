//! Startup configuration intake
//!
//! Untyped input (a JSON config file, CLI flags folded into JSON values, or
//! values built in code) is converted here, once, into the strict
//! [`ServerConfig`]. Nothing past this boundary re-validates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// File name of the server binary
pub const SERVER_EXECUTABLE: &str = "gst-switch-srv";

pub const DEFAULT_VIDEO_PORT: u16 = 3000;
pub const DEFAULT_AUDIO_PORT: u16 = 4000;
pub const DEFAULT_CONTROLLER_ADDRESS: &str = "tcp:host=0.0.0.0,port=5000";

/// Directories searched for the server executable when no path is given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Snapshot of `PATH`, read once
    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).collect())
            .unwrap_or_default();
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First directory holding an executable file called `name`
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Raw, possibly untrusted startup values
///
/// Absent keys take the documented defaults; an explicit `null` is a value
/// and is judged by the validator like any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawServerConfig {
    pub path: Value,
    pub video_port: Value,
    pub audio_port: Value,
    pub controller_address: Value,
    pub record_file: Value,
}

impl Default for RawServerConfig {
    fn default() -> Self {
        Self {
            path: Value::Null,
            video_port: Value::from(DEFAULT_VIDEO_PORT),
            audio_port: Value::from(DEFAULT_AUDIO_PORT),
            controller_address: Value::from(DEFAULT_CONTROLLER_ADDRESS),
            record_file: Value::Bool(false),
        }
    }
}

impl RawServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(input: &str) -> ConfigResult<Self> {
        serde_json::from_str(input).map_err(|e| ConfigError::ConfigFile {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Configure executable directory (fluent API)
    pub fn with_path(mut self, path: impl Into<Value>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_video_port(mut self, port: impl Into<Value>) -> Self {
        self.video_port = port.into();
        self
    }

    pub fn with_audio_port(mut self, port: impl Into<Value>) -> Self {
        self.audio_port = port.into();
        self
    }

    pub fn with_controller_address(mut self, address: impl Into<Value>) -> Self {
        self.controller_address = address.into();
        self
    }

    pub fn with_record_file(mut self, record_file: impl Into<Value>) -> Self {
        self.record_file = record_file.into();
        self
    }
}

/// Control-channel address, e.g. `tcp:host=0.0.0.0,port=5000` or `127.0.0.1:5000`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlAddress {
    raw: String,
    host: String,
    port: u16,
}

impl ControlAddress {
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let malformed = |reason: &str| ConfigError::Malformed {
            field: "controller_address",
            value: raw.to_string(),
            reason: reason.to_string(),
        };

        let (_, rest) = raw
            .split_once(':')
            .ok_or_else(|| malformed("expected ':' between address components"))?;

        let (host, port) = if rest.contains('=') {
            let mut host = None;
            let mut port = None;
            for pair in rest.split(',') {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| malformed("expected key=value pairs"))?;
                match key.trim() {
                    "host" => host = Some(value.trim()),
                    "port" => port = Some(value.trim()),
                    _ => {}
                }
            }
            (
                host.ok_or_else(|| malformed("missing host"))?,
                port.ok_or_else(|| malformed("missing port"))?,
            )
        } else {
            let (host, port) = raw
                .rsplit_once(':')
                .ok_or_else(|| malformed("expected host:port"))?;
            (host.trim_start_matches('[').trim_end_matches(']'), port)
        };

        if host.is_empty() {
            return Err(malformed("empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| malformed("port is not a number in 0..=65535"))?;

        Ok(Self {
            raw: raw.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// The address exactly as supplied, passed through to the server
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host and port a client should dial; wildcard listen hosts map to loopback
    pub fn connect_target(&self) -> (String, u16) {
        let host = match self.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "::1",
            other => other,
        };
        (host.to_string(), self.port)
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for ControlAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Recording behavior requested from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordMode {
    Disabled,
    /// Record under the server's default file name
    ServerDefault,
    /// Record to this file name; strftime patterns are expanded by the server
    Named(String),
}

/// Validated, immutable server startup configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    executable: PathBuf,
    video_port: u16,
    audio_port: u16,
    controller_address: ControlAddress,
    record: RecordMode,
}

impl ServerConfig {
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn video_port(&self) -> u16 {
        self.video_port
    }

    pub fn audio_port(&self) -> u16 {
        self.audio_port
    }

    pub fn controller_address(&self) -> &ControlAddress {
        &self.controller_address
    }

    pub fn record(&self) -> &RecordMode {
        &self.record
    }
}

/// Converts [`RawServerConfig`] into [`ServerConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConfigValidator {
    search_path: SearchPath,
}

impl ConfigValidator {
    pub fn new(search_path: SearchPath) -> Self {
        Self { search_path }
    }

    pub fn from_env() -> Self {
        Self::new(SearchPath::from_env())
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn validate(&self, raw: &RawServerConfig) -> ConfigResult<ServerConfig> {
        let video_port = validate_port("video_port", &raw.video_port)?;
        let audio_port = validate_port("audio_port", &raw.audio_port)?;
        let controller_address = validate_controller_address(&raw.controller_address)?;
        let record = validate_record_file(&raw.record_file)?;
        let executable = self.resolve_executable(&raw.path)?;

        Ok(ServerConfig {
            executable,
            video_port,
            audio_port,
            controller_address,
            record,
        })
    }

    /// Explicit directory ⇒ `<dir>/gst-switch-srv`; `null` or `""` ⇒ search path
    pub fn resolve_executable(&self, path: &Value) -> ConfigResult<PathBuf> {
        match path {
            Value::Null => self.discover(),
            Value::String(dir) if dir.is_empty() => self.discover(),
            Value::String(dir) => Ok(Path::new(dir).join(SERVER_EXECUTABLE)),
            other => Err(ConfigError::WrongType {
                field: "path",
                expected: "directory string",
                found: describe(other),
            }),
        }
    }

    fn discover(&self) -> ConfigResult<PathBuf> {
        self.search_path
            .find(SERVER_EXECUTABLE)
            .ok_or_else(|| ConfigError::ExecutableNotFound {
                name: SERVER_EXECUTABLE.to_string(),
                searched: self.search_path.dirs().to_vec(),
            })
    }
}

/// A port must be present, integral, and within 0..=65535
pub fn validate_port(field: &'static str, value: &Value) -> ConfigResult<u16> {
    if is_absent(value) {
        return Err(ConfigError::Missing { field });
    }

    let out_of_range = |value: String| ConfigError::OutOfRange { field, value };

    match value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return u16::try_from(int).map_err(|_| out_of_range(int.to_string()));
            }
            if let Some(uint) = number.as_u64() {
                return Err(out_of_range(uint.to_string()));
            }
            match number.as_f64() {
                Some(float) if float.is_finite() && float.fract() == 0.0 => {
                    if (0.0..=f64::from(u16::MAX)).contains(&float) {
                        Ok(float as u16)
                    } else {
                        Err(out_of_range(number.to_string()))
                    }
                }
                _ => Err(ConfigError::WrongType {
                    field,
                    expected: "integer",
                    found: describe(value),
                }),
            }
        }
        other => Err(ConfigError::WrongType {
            field,
            expected: "integer",
            found: describe(other),
        }),
    }
}

/// The address must be a non-empty string with separable host and port parts
pub fn validate_controller_address(value: &Value) -> ConfigResult<ControlAddress> {
    const FIELD: &str = "controller_address";

    if is_absent(value) {
        return Err(ConfigError::Missing { field: FIELD });
    }
    match value {
        Value::String(address) => ControlAddress::parse(address),
        other => Err(ConfigError::WrongType {
            field: FIELD,
            expected: "string",
            found: describe(other),
        }),
    }
}

/// `false` ⇒ off, `true` ⇒ server default name, plain file name ⇒ that name
pub fn validate_record_file(value: &Value) -> ConfigResult<RecordMode> {
    const FIELD: &str = "record_file";

    if is_absent(value) {
        return Err(ConfigError::Missing { field: FIELD });
    }
    match value {
        Value::Bool(false) => Ok(RecordMode::Disabled),
        Value::Bool(true) => Ok(RecordMode::ServerDefault),
        Value::String(name) if name.contains(['/', '\\']) => Err(ConfigError::Malformed {
            field: FIELD,
            value: name.clone(),
            reason: "file name must not contain path separators".to_string(),
        }),
        Value::String(name) => Ok(RecordMode::Named(name.clone())),
        other => Err(ConfigError::WrongType {
            field: FIELD,
            expected: "bool or file name",
            found: describe(other),
        }),
    }
}

/// `null`, `""`, `[]` and `{}` all mean "not supplied"
fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Object(map) => format!("object with {} keys", map.len()),
    }
}
