//! Control-channel connection
//!
//! One TCP socket carries both call/response traffic and unsolicited
//! signals. A reader task owns the read half and routes every frame: replies
//! complete the single outstanding call, signals are queued to a separate
//! dispatch task so slow handlers never stall the socket.
//!
//! A writer task owns the write half, so a frame is always written whole even
//! when the caller that queued it is cancelled. Calls are serialized through
//! a FIFO call slot: a second call waits until the first has its answer,
//! failed or timed out.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::config::ControlAddress;
use crate::core::dispatcher::SignalDispatcher;
use crate::error::{ConnectionError, RemoteError, SwitchError, SwitchResult};
use shared::{
    read_frame, switch_debug, switch_info, switch_warn, write_frame, Frame, Role, SharedError, Value,
    WireFormat, PROTOCOL_VERSION,
};

/// How long `close` waits for queued writes before giving up on a clean
/// shutdown of the write half
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Tunables for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bound on TCP connect plus handshake
    pub connect_timeout: Duration,
    /// Bound on waiting for a call's reply
    pub call_timeout: Duration,
    pub wire_format: WireFormat,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            wire_format: WireFormat::Bincode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Established,
    Closed,
}

type Reply = Result<Value, SwitchError>;

struct PendingCall {
    serial: u32,
    method: String,
    reply: oneshot::Sender<Reply>,
}

/// Requests handled by the writer task, in queue order
enum WriteRequest {
    Frame(Frame, oneshot::Sender<Result<(), SharedError>>),
    Shutdown(oneshot::Sender<()>),
}

struct Slot {
    state: ConnectionState,
    pending: Option<PendingCall>,
}

/// State shared between the caller side and the reader task
///
/// The connection state and the outstanding call sit under one lock, so a
/// call can never be installed after the connection was closed.
struct Shared {
    slot: Mutex<Slot>,
}

impl Shared {
    fn new(state: ConnectionState) -> Self {
        Self {
            slot: Mutex::new(Slot { state, pending: None }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Install the outstanding call, unless the connection is no longer open
    fn set_pending(&self, call: PendingCall) -> Result<(), ConnectionError> {
        let mut slot = self.lock();
        if slot.state != ConnectionState::Established {
            return Err(ConnectionError::Closed);
        }
        slot.pending = Some(call);
        Ok(())
    }

    /// Take the outstanding call if it has the given serial
    fn take_pending(&self, serial: u32) -> Option<PendingCall> {
        let mut slot = self.lock();
        match slot.pending.as_ref() {
            Some(call) if call.serial == serial => slot.pending.take(),
            _ => None,
        }
    }

    /// Mark the connection closed and fail the outstanding call with `error`
    ///
    /// Returns false if the connection was already closed.
    fn close_with(&self, error: ConnectionError) -> bool {
        let (was_open, call) = {
            let mut slot = self.lock();
            let was_open = slot.state != ConnectionState::Closed;
            slot.state = ConnectionState::Closed;
            (was_open, slot.pending.take())
        };
        if let Some(call) = call {
            switch_debug!(Role::Connection, "Failing outstanding call {} (serial {})", call.method, call.serial);
            // Receiver may already be gone after a timeout
            let _ = call.reply.send(Err(error.into()));
        }
        was_open
    }
}

/// An established control channel
pub struct Connection {
    address: ControlAddress,
    options: ConnectOptions,
    shared: Arc<Shared>,
    outbox: mpsc::UnboundedSender<WriteRequest>,
    call_slot: tokio::sync::Mutex<()>,
    next_serial: AtomicU32,
    reader_task: JoinHandle<()>,
}

impl Connection {
    /// Open the socket, complete the handshake and start the reader
    pub async fn connect(
        address: &ControlAddress,
        options: ConnectOptions,
        dispatcher: Arc<SignalDispatcher>,
    ) -> Result<Self, ConnectionError> {
        let (host, port) = address.connect_target();
        switch_info!(Role::Connection, "Connecting to {} ({}:{})", address, host, port);

        let connect_error = |source: io::Error| ConnectionError::Connect {
            address: address.to_string(),
            source,
        };
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| connect_error(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")))?
            .map_err(connect_error)?;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        tokio::time::timeout(
            options.connect_timeout,
            handshake(&mut reader, &mut write_half, options.wire_format),
        )
        .await
        .map_err(|_| "no welcome before the connect timeout".to_string())
        .and_then(|result| result)
        .map_err(|reason| ConnectionError::Handshake {
            address: address.to_string(),
            reason,
        })?;

        let shared = Arc::new(Shared::new(ConnectionState::Established));

        // Both tasks end on their own once their queues close
        let (outbox, write_queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write_half, options.wire_format, write_queue));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_signals(signal_rx, dispatcher));
        let reader_task = tokio::spawn(read_loop(reader, options.wire_format, shared.clone(), signal_tx));

        switch_info!(Role::Connection, "Connection established with {} ({})", address, options.wire_format);
        Ok(Self {
            address: address.clone(),
            options,
            shared,
            outbox,
            call_slot: tokio::sync::Mutex::new(()),
            next_serial: AtomicU32::new(1),
            reader_task,
        })
    }

    pub fn address(&self) -> &ControlAddress {
        &self.address
    }

    pub fn options(&self) -> ConnectOptions {
        self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Invoke a remote method with the default call timeout
    pub async fn call(&self, method: &str, args: Vec<Value>) -> SwitchResult<Value> {
        self.call_with_timeout(method, args, self.options.call_timeout).await
    }

    /// Invoke a remote method, waiting at most `timeout` for its reply
    pub async fn call_with_timeout(&self, method: &str, args: Vec<Value>, timeout: Duration) -> SwitchResult<Value> {
        if !self.is_established() {
            return Err(ConnectionError::Closed.into());
        }

        // Held until the reply arrives: this is the one-outstanding-call slot
        let _slot = self.call_slot.lock().await;

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.set_pending(PendingCall {
            serial,
            method: method.to_string(),
            reply: reply_tx,
        })?;

        switch_debug!(Role::Connection, "Calling {} (serial {}) with {} args", method, serial, args.len());
        if let Err(error) = self.send(Frame::call(serial, method, args)).await {
            self.shared.take_pending(serial);
            if matches!(error, ConnectionError::Io(_)) {
                switch_warn!(Role::Connection, "Write to {} failed, closing: {}", self.address, error);
                self.shared.close_with(ConnectionError::Closed);
                self.reader_task.abort();
            }
            return Err(error.into());
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ConnectionError::Closed.into()),
            Err(_) => {
                self.shared.take_pending(serial);
                switch_warn!(Role::Connection, "Call {} (serial {}) timed out after {:?}", method, serial, timeout);
                Err(ConnectionError::Timeout {
                    method: method.to_string(),
                    timeout,
                }
                .into())
            }
        }
    }

    /// Close the channel; a blocked call fails with `Closed`
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self) {
        if !self.shared.close_with(ConnectionError::Closed) {
            return;
        }
        self.reader_task.abort();

        let (done_tx, done_rx) = oneshot::channel();
        if self.outbox.send(WriteRequest::Shutdown(done_tx)).is_ok()
            && tokio::time::timeout(CLOSE_GRACE, done_rx).await.is_err()
        {
            switch_debug!(Role::Connection, "Write half of {} did not shut down in time", self.address);
        }
        switch_info!(Role::Connection, "Connection to {} closed", self.address);
    }

    /// Queue a frame for the writer task and wait until it is on the socket
    ///
    /// Cancelling the wait does not cancel the write.
    async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.outbox
            .send(WriteRequest::Frame(frame, done_tx))
            .map_err(|_| ConnectionError::Closed)?;
        match done_rx.await {
            Ok(result) => result.map_err(wire_error),
            Err(_) => Err(ConnectionError::Closed),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close_with(ConnectionError::Closed);
        self.reader_task.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("options", &self.options)
            .finish()
    }
}

fn wire_error(error: SharedError) -> ConnectionError {
    match error {
        SharedError::Io(e) => ConnectionError::Io(e),
        other => ConnectionError::MalformedFrame(other),
    }
}

async fn handshake(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    format: WireFormat,
) -> Result<(), String> {
    let hello = Frame::Hello {
        protocol: PROTOCOL_VERSION,
    };
    write_frame(writer, &hello, format)
        .await
        .map_err(|e| format!("sending hello: {e}"))?;

    match read_frame(reader, format).await {
        Ok(Some(Frame::Welcome { protocol })) if protocol == PROTOCOL_VERSION => Ok(()),
        Ok(Some(Frame::Welcome { protocol })) => Err(format!(
            "server speaks protocol {protocol}, client speaks {PROTOCOL_VERSION}"
        )),
        Ok(Some(other)) => Err(format!("expected welcome, got {}", other.tag())),
        Ok(None) => Err("server closed the connection".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, format: WireFormat, mut queue: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = queue.recv().await {
        match request {
            WriteRequest::Frame(frame, done) => {
                let _ = done.send(write_frame(&mut writer, &frame, format).await);
            }
            WriteRequest::Shutdown(done) => {
                if let Err(e) = writer.shutdown().await {
                    switch_debug!(Role::Connection, "Shutdown of write half failed: {}", e);
                }
                let _ = done.send(());
                return;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    format: WireFormat,
    shared: Arc<Shared>,
    signals: mpsc::UnboundedSender<(String, Vec<Value>)>,
) {
    let reason = loop {
        match read_frame(&mut reader, format).await {
            Ok(Some(frame)) => route_frame(frame, &shared, &signals),
            Ok(None) => break ConnectionError::Closed,
            Err(e) => break wire_error(e),
        }
    };

    let description = reason.to_string();
    if shared.close_with(reason) {
        switch_warn!(Role::Connection, "Control channel lost: {}", description);
    }
}

fn route_frame(frame: Frame, shared: &Shared, signals: &mpsc::UnboundedSender<(String, Vec<Value>)>) {
    match frame {
        Frame::Return { reply_to, value } => match shared.take_pending(reply_to) {
            Some(call) => {
                let _ = call.reply.send(Ok(value));
            }
            None => switch_debug!(Role::Connection, "Discarding late return for serial {}", reply_to),
        },
        Frame::Error {
            reply_to,
            name,
            message,
        } => match shared.take_pending(reply_to) {
            Some(call) => {
                let error = RemoteError {
                    method: call.method,
                    name,
                    message,
                };
                let _ = call.reply.send(Err(error.into()));
            }
            None => switch_debug!(Role::Connection, "Discarding late error {} for serial {}", name, reply_to),
        },
        Frame::Signal { name, args } => {
            if signals.send((name, args)).is_err() {
                switch_debug!(Role::Connection, "Signal queue closed, dropping signal");
            }
        }
        other => switch_warn!(Role::Connection, "Ignoring unexpected {} frame", other.tag()),
    }
}

async fn dispatch_signals(mut queue: mpsc::UnboundedReceiver<(String, Vec<Value>)>, dispatcher: Arc<SignalDispatcher>) {
    while let Some((name, args)) = queue.recv().await {
        let report = dispatcher.dispatch_raw(&name, &args);
        if report.invoked > 0 {
            switch_debug!(
                Role::Connection,
                "Delivered {} to {} handlers ({} failed)",
                name,
                report.invoked,
                report.failed
            );
        }
    }
}
