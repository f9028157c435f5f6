//! Command line front-end for the gst-switch supervisor and controller

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

use shared::{logging, switch_debug, switch_info, switch_warn, CompositeMode, Role, VideoChannel, WireFormat};
use switchctl::{
    ClientSettings, ConfigValidator, ControlAddress, Controller, LifecycleState, RawServerConfig, Supervisor,
};

/// How often `serve` checks whether the server died on its own
const SUPERVISION_INTERVAL: Duration = Duration::from_secs(1);

/// Launch and control a gst-switch server
#[derive(Parser)]
#[command(name = "switchctl")]
#[command(about = "Supervise a gst-switch server and drive it over its control channel")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    pub verbose: bool,

    /// Control address, overrides SWITCH_CONTROL_ADDRESS
    #[arg(long)]
    pub address: Option<String>,

    /// Reply timeout in milliseconds, overrides SWITCH_CALL_TIMEOUT_MS
    #[arg(long)]
    pub call_timeout_ms: Option<u64>,

    /// Frame payload encoding (bincode, json), overrides SWITCH_WIRE_FORMAT
    #[arg(long)]
    pub wire_format: Option<WireFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Launch the server and supervise it until Ctrl+C
    Serve(ServeArgs),

    /// Print the compose, encode, audio and preview ports
    Ports,

    /// Print the composite mode, or change it
    Mode { mode: Option<CompositeMode> },

    /// Route the source on PORT to CHANNEL (a, b, audio)
    Switch { channel: VideoChannel, port: u16 },

    /// Start a new recording file
    Record,

    /// Move and resize the picture-in-picture window
    Pip { x: i32, y: i32, width: i32, height: i32 },

    /// Print server signals until Ctrl+C
    Watch,
}

#[derive(ClapArgs)]
pub struct ServeArgs {
    /// JSON file with path, video_port, audio_port, controller_address, record_file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding gst-switch-srv; searched on PATH when omitted
    #[arg(long)]
    pub path: Option<PathBuf>,

    #[arg(long)]
    pub video_port: Option<u16>,

    #[arg(long)]
    pub audio_port: Option<u16>,

    /// Record the output under the server's default file name
    #[arg(long)]
    pub record: bool,

    /// Record the output to this file name template
    #[arg(long, value_name = "NAME", conflicts_with = "record")]
    pub record_file: Option<String>,

    /// Ask an instrumented server to flush coverage before stopping
    #[arg(long)]
    pub coverage: bool,

    /// Milliseconds to wait for exit before killing the server
    #[arg(long, default_value = "5000")]
    pub grace_ms: u64,
}

impl ServeArgs {
    /// Layer the command line over the optional config file
    fn raw_config(&self, controller_address: Option<&str>) -> Result<RawServerConfig> {
        let mut raw = match &self.config {
            Some(file) => RawServerConfig::from_file(file)?,
            None => RawServerConfig::new(),
        };
        if let Some(path) = &self.path {
            raw = raw.with_path(path.to_string_lossy().into_owned());
        }
        if let Some(port) = self.video_port {
            raw = raw.with_video_port(port);
        }
        if let Some(port) = self.audio_port {
            raw = raw.with_audio_port(port);
        }
        if let Some(address) = controller_address {
            raw = raw.with_controller_address(address);
        }
        if self.record {
            raw = raw.with_record_file(true);
        }
        if let Some(name) = &self.record_file {
            raw = raw.with_record_file(name.as_str());
        }
        Ok(raw)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { args.log_level.as_str() };
    logging::init_tracing(Some(log_level));

    let mut settings = ClientSettings::from_env().context("Invalid client settings in environment")?;
    if let Some(address) = &args.address {
        settings.control_address = ControlAddress::parse(address).context("Invalid --address")?;
    }
    if let Some(ms) = args.call_timeout_ms {
        settings.connect.call_timeout = Duration::from_millis(ms);
    }
    if let Some(format) = args.wire_format {
        settings.connect.wire_format = format;
    }

    match args.command {
        Command::Serve(serve_args) => {
            let address = args.address.as_ref().map(|_| settings.control_address.as_str());
            let raw = serve_args.raw_config(address)?;
            serve(raw, serve_args.coverage, Duration::from_millis(serve_args.grace_ms)).await
        }
        command => {
            let mut controller = Controller::with_options(settings.control_address.clone(), settings.connect);
            controller
                .establish_connection()
                .await
                .with_context(|| format!("Could not connect to {}", settings.control_address))?;
            let outcome = run_command(&controller, command).await;
            controller.close().await;
            outcome
        }
    }
}

async fn serve(raw: RawServerConfig, flush_coverage: bool, grace: Duration) -> Result<()> {
    let config = ConfigValidator::from_env().validate(&raw).context("Invalid server configuration")?;
    logging::log_startup(Role::Cli, &format!("server {}", config.executable().display()));

    let mut supervisor = Supervisor::new(config);
    let pid = supervisor.start()?;
    switch_info!(Role::Cli, "Supervising server PID {} (Ctrl+C to stop)", pid);

    let mut ticker = tokio::time::interval(SUPERVISION_INTERVAL);
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => logging::log_shutdown(Role::Cli, "Received Ctrl+C signal"),
                    Err(err) => logging::log_error(Role::Cli, "Signal handling", &err),
                }
                break;
            }
            _ = ticker.tick() => {
                if supervisor.check()? == LifecycleState::Terminated {
                    switch_warn!(Role::Cli, "Server exited unexpectedly: {:?}", supervisor.last_exit());
                    return Ok(());
                }
            }
        }
    }

    let status = supervisor
        .terminate_and_reap(flush_coverage, grace)
        .await
        .context("Failed to stop server")?;
    switch_debug!(Role::Cli, "Server exit status: {:?}", status);
    logging::log_success(Role::Cli, "Server stopped");
    Ok(())
}

async fn run_command(controller: &Controller, command: Command) -> Result<()> {
    match command {
        Command::Ports => {
            println!("compose: {}", controller.get_compose_port().await?);
            println!("encode:  {}", controller.get_encode_port().await?);
            println!("audio:   {}", controller.get_audio_port().await?);
            for preview in controller.get_preview_ports().await? {
                println!(
                    "preview: {} (serve {}, type {})",
                    preview.port, preview.serve, preview.type_code
                );
            }
        }
        Command::Mode { mode: None } => {
            println!("{}", controller.get_composite_mode().await?);
        }
        Command::Mode { mode: Some(mode) } => {
            if !controller.set_composite_mode(mode).await? {
                anyhow::bail!("Server rejected composite mode {mode}");
            }
        }
        Command::Switch { channel, port } => {
            if !controller.switch(channel, port).await? {
                anyhow::bail!("Server rejected switching port {port} to channel {channel}");
            }
        }
        Command::Record => {
            if !controller.new_record().await? {
                anyhow::bail!("Server could not start a new recording");
            }
        }
        Command::Pip { x, y, width, height } => {
            let result = controller.adjust_pip(x, y, width, height).await?;
            println!("{result}");
        }
        Command::Watch => {
            controller.on_new_mode_online(|mode| println!("new-mode-online {mode}"));
            controller.on_preview_port_added(|port, serve, type_code| {
                println!("preview-port-added {port} {serve} {type_code}")
            });
            controller.on_preview_port_removed(|port, serve, type_code| {
                println!("preview-port-removed {port} {serve} {type_code}")
            });
            controller.on_show_face_marker(|faces| println!("show-face-marker {faces:?}"));
            controller.on_show_track_marker(|faces| println!("show-track-marker {faces:?}"));
            controller.on_select_face(|x, y| println!("select-face {x} {y}"));

            switch_info!(Role::Cli, "Watching signals from {} (Ctrl+C to stop)", controller.address());
            signal::ctrl_c().await.context("Signal handling")?;
            logging::log_shutdown(Role::Cli, "Received Ctrl+C signal");
        }
        Command::Serve(_) => anyhow::bail!("serve does not run over a control connection"),
    }
    Ok(())
}
