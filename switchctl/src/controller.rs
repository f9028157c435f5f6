//! Typed facade over the control channel
//!
//! Each remote operation is a thin wrapper: arguments become `Value`s, the
//! reply is checked against the shape the server documents for that method.
//! Signal registrations live in a dispatcher owned by the controller, so they
//! survive reconnects.

use std::sync::Arc;

use crate::core::config::ControlAddress;
use crate::core::dispatcher::SignalDispatcher;
use crate::error::{ConnectionError, SwitchResult};
use crate::services::connection::{ConnectOptions, Connection, ConnectionState};
use shared::{
    encode_faces, switch_debug, switch_info, CompositeMode, FaceRect, PreviewPort, Role, Signal, SignalKind,
    Value, VideoChannel,
};

/// Remote method names
mod method {
    pub const GET_COMPOSE_PORT: &str = "get_compose_port";
    pub const GET_ENCODE_PORT: &str = "get_encode_port";
    pub const GET_AUDIO_PORT: &str = "get_audio_port";
    pub const GET_PREVIEW_PORTS: &str = "get_preview_ports";
    pub const GET_COMPOSITE_MODE: &str = "get_composite_mode";
    pub const SET_COMPOSITE_MODE: &str = "set_composite_mode";
    pub const NEW_RECORD: &str = "new_record";
    pub const ADJUST_PIP: &str = "adjust_pip";
    pub const SWITCH: &str = "switch";
    pub const CLICK_VIDEO: &str = "click_video";
    pub const MARK_FACE: &str = "mark_face";
    pub const MARK_TRACKING: &str = "mark_tracking";
}

pub struct Controller {
    address: ControlAddress,
    options: ConnectOptions,
    dispatcher: Arc<SignalDispatcher>,
    connection: Option<Arc<Connection>>,
}

impl Controller {
    pub fn new(address: ControlAddress) -> Self {
        Self::with_options(address, ConnectOptions::default())
    }

    pub fn with_options(address: ControlAddress, options: ConnectOptions) -> Self {
        Self {
            address,
            options,
            dispatcher: Arc::new(SignalDispatcher::new()),
            connection: None,
        }
    }

    pub fn address(&self) -> &ControlAddress {
        &self.address
    }

    pub fn dispatcher(&self) -> &Arc<SignalDispatcher> {
        &self.dispatcher
    }

    /// Connect to the configured address, replacing any previous connection
    ///
    /// On failure the controller is left without a connection and every call
    /// fails with `NotConnected` until this succeeds.
    pub async fn establish_connection(&mut self) -> SwitchResult<()> {
        if let Some(previous) = self.connection.take() {
            previous.close().await;
        }
        let connection = Connection::connect(&self.address, self.options, self.dispatcher.clone()).await?;
        self.connection = Some(Arc::new(connection));
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, |connection| connection.state())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// The live connection, for raw calls
    pub fn connection(&self) -> SwitchResult<Arc<Connection>> {
        self.connection
            .clone()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> SwitchResult<Value> {
        let connection = self.connection()?;
        let value = connection.call(method, args).await?;
        Ok(value.into_scalar())
    }

    /// Port serving the composited output
    pub async fn get_compose_port(&self) -> SwitchResult<u16> {
        let value = self.call(method::GET_COMPOSE_PORT, vec![]).await?;
        reply_port(method::GET_COMPOSE_PORT, &value)
    }

    /// Port serving the encoded output
    pub async fn get_encode_port(&self) -> SwitchResult<u16> {
        let value = self.call(method::GET_ENCODE_PORT, vec![]).await?;
        reply_port(method::GET_ENCODE_PORT, &value)
    }

    pub async fn get_audio_port(&self) -> SwitchResult<u16> {
        let value = self.call(method::GET_AUDIO_PORT, vec![]).await?;
        reply_port(method::GET_AUDIO_PORT, &value)
    }

    /// One entry per input source currently available for preview
    pub async fn get_preview_ports(&self) -> SwitchResult<Vec<PreviewPort>> {
        let value = self.call(method::GET_PREVIEW_PORTS, vec![]).await?;
        reply_preview_ports(&value)
    }

    pub async fn get_composite_mode(&self) -> SwitchResult<CompositeMode> {
        let value = self.call(method::GET_COMPOSITE_MODE, vec![]).await?;
        let code = reply_int(method::GET_COMPOSITE_MODE, &value)?;
        CompositeMode::from_code(code).map_err(|e| unexpected(method::GET_COMPOSITE_MODE, e.to_string()))
    }

    /// Request a mode change
    ///
    /// `Ok(false)` means the server refused the transition; the channel is
    /// fine.
    pub async fn set_composite_mode(&self, mode: CompositeMode) -> SwitchResult<bool> {
        let value = self
            .call(method::SET_COMPOSITE_MODE, vec![Value::Int(mode.code())])
            .await?;
        let accepted = reply_bool(method::SET_COMPOSITE_MODE, &value)?;
        switch_debug!(Role::Controller, "set_composite_mode({}) -> {}", mode, accepted);
        Ok(accepted)
    }

    /// Start a new recording file
    pub async fn new_record(&self) -> SwitchResult<bool> {
        let value = self.call(method::NEW_RECORD, vec![]).await?;
        reply_bool(method::NEW_RECORD, &value)
    }

    /// Move and resize the picture-in-picture window
    ///
    /// Returns the server's result code.
    pub async fn adjust_pip(&self, x: i32, y: i32, width: i32, height: i32) -> SwitchResult<u32> {
        let args = vec![x.into(), y.into(), width.into(), height.into()];
        let value = self.call(method::ADJUST_PIP, args).await?;
        let code = reply_int(method::ADJUST_PIP, &value)?;
        u32::try_from(code).map_err(|_| unexpected(method::ADJUST_PIP, format!("result {code} is negative")))
    }

    /// Route the source on `port` to `channel`
    pub async fn switch(&self, channel: VideoChannel, port: u16) -> SwitchResult<bool> {
        let value = self
            .call(method::SWITCH, vec![Value::Int(channel.code()), port.into()])
            .await?;
        reply_bool(method::SWITCH, &value)
    }

    pub async fn click_video(&self, x: i32, y: i32, width: i32, height: i32) -> SwitchResult<bool> {
        let args = vec![x.into(), y.into(), width.into(), height.into()];
        let value = self.call(method::CLICK_VIDEO, args).await?;
        reply_bool(method::CLICK_VIDEO, &value)
    }

    pub async fn mark_face(&self, faces: &[FaceRect]) -> SwitchResult<()> {
        let value = self.call(method::MARK_FACE, vec![encode_faces(faces)]).await?;
        reply_unit(method::MARK_FACE, &value)
    }

    pub async fn mark_tracking(&self, faces: &[FaceRect]) -> SwitchResult<()> {
        let value = self.call(method::MARK_TRACKING, vec![encode_faces(faces)]).await?;
        reply_unit(method::MARK_TRACKING, &value)
    }

    /// Register a handler for any signal kind
    pub fn subscribe<F>(&self, kind: SignalKind, handler: F)
    where
        F: Fn(&Signal) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        switch_info!(Role::Controller, "Registering handler for {}", kind);
        self.dispatcher.subscribe(kind, handler);
    }

    pub fn on_new_mode_online<F>(&self, callback: F)
    where
        F: Fn(CompositeMode) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::NewModeOnline, move |signal| {
            if let Signal::NewModeOnline { mode } = signal {
                callback(*mode);
            }
            Ok(())
        });
    }

    /// `callback(port, serve, type_code)`
    pub fn on_preview_port_added<F>(&self, callback: F)
    where
        F: Fn(u16, i32, i32) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::PreviewPortAdded, move |signal| {
            if let Signal::PreviewPortAdded { port, serve, type_code } = signal {
                callback(*port, *serve, *type_code);
            }
            Ok(())
        });
    }

    /// `callback(port, serve, type_code)`
    pub fn on_preview_port_removed<F>(&self, callback: F)
    where
        F: Fn(u16, i32, i32) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::PreviewPortRemoved, move |signal| {
            if let Signal::PreviewPortRemoved { port, serve, type_code } = signal {
                callback(*port, *serve, *type_code);
            }
            Ok(())
        });
    }

    pub fn on_show_face_marker<F>(&self, callback: F)
    where
        F: Fn(&[FaceRect]) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::ShowFaceMarker, move |signal| {
            if let Signal::ShowFaceMarker { faces } = signal {
                callback(faces);
            }
            Ok(())
        });
    }

    pub fn on_show_track_marker<F>(&self, callback: F)
    where
        F: Fn(&[FaceRect]) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::ShowTrackMarker, move |signal| {
            if let Signal::ShowTrackMarker { faces } = signal {
                callback(faces);
            }
            Ok(())
        });
    }

    /// `callback(x, y)`
    pub fn on_select_face<F>(&self, callback: F)
    where
        F: Fn(i32, i32) + Send + Sync + 'static,
    {
        self.subscribe(SignalKind::SelectFace, move |signal| {
            if let Signal::SelectFace { x, y } = signal {
                callback(*x, *y);
            }
            Ok(())
        });
    }
}

fn unexpected(method: &str, reason: impl Into<String>) -> crate::error::SwitchError {
    ConnectionError::UnexpectedReply {
        method: method.to_string(),
        reason: reason.into(),
    }
    .into()
}

fn reply_int(method: &str, value: &Value) -> SwitchResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| unexpected(method, format!("expected int, got {}", value.kind())))
}

fn reply_port(method: &str, value: &Value) -> SwitchResult<u16> {
    let raw = reply_int(method, value)?;
    u16::try_from(raw).map_err(|_| unexpected(method, format!("{raw} is not a port")))
}

fn reply_bool(method: &str, value: &Value) -> SwitchResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| unexpected(method, format!("expected bool, got {}", value.kind())))
}

fn reply_unit(method: &str, value: &Value) -> SwitchResult<()> {
    match value {
        Value::Unit => Ok(()),
        Value::Tuple(items) if items.is_empty() => Ok(()),
        other => Err(unexpected(method, format!("expected no value, got {}", other.kind()))),
    }
}

fn reply_preview_ports(value: &Value) -> SwitchResult<Vec<PreviewPort>> {
    let items = value
        .as_items()
        .ok_or_else(|| unexpected(method::GET_PREVIEW_PORTS, format!("expected array, got {}", value.kind())))?;

    items
        .iter()
        .map(|item| {
            let fields = item
                .as_items()
                .filter(|fields| fields.len() == 3)
                .ok_or_else(|| unexpected(method::GET_PREVIEW_PORTS, format!("expected (port, serve, type), got {item}")))?;
            let port = reply_port(method::GET_PREVIEW_PORTS, &fields[0])?;
            let int32 = |value: &Value| {
                reply_int(method::GET_PREVIEW_PORTS, value).and_then(|raw| {
                    i32::try_from(raw).map_err(|_| unexpected(method::GET_PREVIEW_PORTS, format!("{raw} out of range")))
                })
            };
            Ok(PreviewPort {
                port,
                serve: int32(&fields[1])?,
                type_code: int32(&fields[2])?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwitchError;

    fn controller() -> Controller {
        Controller::new(ControlAddress::parse("tcp:host=127.0.0.1,port=5000").unwrap())
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail_with_not_connected() {
        let controller = controller();
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        let err = controller.get_compose_port().await.unwrap_err();
        assert!(matches!(err, SwitchError::Connection(ConnectionError::NotConnected)));
        assert!(!err.is_remote());

        assert!(controller.set_composite_mode(CompositeMode::DualEqual).await.unwrap_err().is_connection());
        assert!(controller.mark_face(&[]).await.unwrap_err().is_connection());
    }

    #[test]
    fn test_registrations_forward_to_dispatcher() {
        let controller = controller();
        controller.on_preview_port_added(|_, _, _| {});
        controller.on_preview_port_added(|_, _, _| {});
        controller.on_new_mode_online(|_| {});

        let dispatcher = controller.dispatcher();
        assert_eq!(dispatcher.subscriber_count(SignalKind::PreviewPortAdded), 2);
        assert_eq!(dispatcher.subscriber_count(SignalKind::NewModeOnline), 1);
        assert_eq!(dispatcher.subscriber_count(SignalKind::SelectFace), 0);
    }

    #[test]
    fn test_typed_callback_receives_positional_payload() {
        let controller = controller();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.on_preview_port_added(move |port, serve, type_code| {
            sink.lock().unwrap().push((port, serve, type_code));
        });

        controller.dispatcher().dispatch(&Signal::PreviewPortAdded {
            port: 3003,
            serve: 1,
            type_code: 7,
        });
        assert_eq!(*seen.lock().unwrap(), vec![(3003, 1, 7)]);
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(reply_port("m", &Value::Int(3001)).unwrap(), 3001);
        assert!(reply_port("m", &Value::Int(70000)).is_err());
        assert!(reply_port("m", &Value::Str("3001".into())).is_err());

        assert!(reply_bool("m", &Value::Bool(false)).is_ok());
        assert!(reply_bool("m", &Value::Int(0)).is_err());

        assert!(reply_unit("m", &Value::Unit).is_ok());
        assert!(reply_unit("m", &Value::Tuple(vec![])).is_ok());
        assert!(reply_unit("m", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_preview_ports_reply() {
        let value = Value::Array(vec![
            Value::Tuple(vec![Value::Int(3003), Value::Int(1), Value::Int(7)]),
            Value::Tuple(vec![Value::Int(3004), Value::Int(1), Value::Int(8)]),
        ]);
        let ports = reply_preview_ports(&value).unwrap();
        assert_eq!(
            ports,
            vec![
                PreviewPort {
                    port: 3003,
                    serve: 1,
                    type_code: 7
                },
                PreviewPort {
                    port: 3004,
                    serve: 1,
                    type_code: 8
                },
            ]
        );

        assert!(reply_preview_ports(&Value::Array(vec![])).unwrap().is_empty());
        let short = Value::Array(vec![Value::Tuple(vec![Value::Int(3003)])]);
        assert!(matches!(
            reply_preview_ports(&short),
            Err(SwitchError::Connection(ConnectionError::UnexpectedReply { .. }))
        ));
    }
}
