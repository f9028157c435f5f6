//! Test fixtures shared across suites

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use shared::{FaceRect, WireFormat};
use switchctl::{ConfigValidator, ConnectOptions, RawServerConfig, SearchPath, ServerConfig};

pub struct TestFixtures;

impl TestFixtures {
    pub const COMPOSE_PORT: u16 = 3001;
    pub const ENCODE_PORT: u16 = 3002;
    pub const AUDIO_PORT: u16 = 4000;

    /// Short timeouts so failure paths finish quickly
    pub fn options() -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(2),
            wire_format: WireFormat::Bincode,
        }
    }

    pub fn options_with_call_timeout(call_timeout: Duration) -> ConnectOptions {
        ConnectOptions {
            call_timeout,
            ..Self::options()
        }
    }

    pub fn faces() -> Vec<FaceRect> {
        vec![FaceRect::new(10, 20, 100, 120), FaceRect::new(300, 40, 80, 90)]
    }

    /// Write an executable stand-in for the server binary into `dir`
    #[cfg(unix)]
    pub fn fake_server_binary(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("gst-switch-srv");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Validated config that discovers the executable in `dir` by search path
    pub fn discovered_config(dir: &Path) -> ServerConfig {
        ConfigValidator::new(SearchPath::new(vec![dir.to_path_buf()]))
            .validate(&RawServerConfig::new().with_controller_address("tcp:host=127.0.0.1,port=5000"))
            .unwrap()
    }
}
