//! Server command line construction

use std::ffi::OsString;

use super::config::{RecordMode, ServerConfig};

/// Argument vector for the server, executable first
///
/// `<exe> --video-input-port=N --audio-input-port=M --controller-address=ADDR [-r | --record=NAME]`
pub fn build_command_line(config: &ServerConfig) -> Vec<OsString> {
    let mut argv = vec![
        config.executable().as_os_str().to_os_string(),
        OsString::from(format!("--video-input-port={}", config.video_port())),
        OsString::from(format!("--audio-input-port={}", config.audio_port())),
        OsString::from(format!("--controller-address={}", config.controller_address())),
    ];

    match config.record() {
        RecordMode::Disabled => {}
        RecordMode::ServerDefault => argv.push(OsString::from("-r")),
        RecordMode::Named(name) => argv.push(OsString::from(format!("--record={name}"))),
    }

    argv
}
