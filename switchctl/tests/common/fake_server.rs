//! Scripted control-channel server for integration tests
//!
//! Speaks the real framing over a loopback TCP socket. Each method name maps
//! to a `Script` describing how the server answers it; unscripted methods get
//! a remote error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shared::{read_frame, write_frame, Frame, Signal, Value, WireFormat, PROTOCOL_VERSION};
use switchctl::ControlAddress;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How the server answers one method
#[derive(Debug, Clone)]
pub enum Script {
    Reply(Value),
    Fail { name: String, message: String },
    /// Never answer
    Silent,
    /// Answer after a pause
    Delayed(Duration, Value),
    /// Emit signals, then answer
    SignalsFirst(Vec<Signal>, Value),
    /// Close the socket instead of answering
    Hangup,
    /// Answer with a length prefix followed by bytes no format can decode
    Garbage,
}

/// Something queued for the client socket
enum Outgoing {
    Frame(Frame),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct ServerState {
    scripts: HashMap<String, Script>,
    calls: Vec<RecordedCall>,
    outbox: Option<mpsc::UnboundedSender<Outgoing>>,
    in_flight: usize,
    max_in_flight: usize,
    connections: usize,
}

pub struct FakeServer {
    address: ControlAddress,
    state: Arc<Mutex<ServerState>>,
    accept_task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        Self::start_with_format(WireFormat::Bincode).await
    }

    pub async fn start_with_format(format: WireFormat) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Wildcard host exercises the loopback mapping on connect
        let address = ControlAddress::parse(&format!("tcp:host=0.0.0.0,port={port}")).unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.lock().unwrap().connections += 1;
                tokio::spawn(serve_client(stream, format, accept_state.clone()));
            }
        });

        Self {
            address,
            state,
            accept_task,
        }
    }

    pub fn address(&self) -> &ControlAddress {
        &self.address
    }

    pub fn on(&self, method: &str, script: Script) -> &Self {
        self.state.lock().unwrap().scripts.insert(method.to_string(), script);
        self
    }

    pub fn reply(&self, method: &str, value: impl Into<Value>) -> &Self {
        self.on(method, Script::Reply(value.into()))
    }

    /// Push an unsolicited signal to the connected client
    pub fn emit(&self, signal: &Signal) {
        let (name, args) = signal.encode();
        let state = self.state.lock().unwrap();
        if let Some(outbox) = &state.outbox {
            let _ = outbox.send(Outgoing::Frame(Frame::signal(name, args)));
        }
    }

    /// Push a raw signal frame, bypassing typed encoding
    pub fn emit_raw(&self, name: &str, args: Vec<Value>) {
        let state = self.state.lock().unwrap();
        if let Some(outbox) = &state.outbox {
            let _ = outbox.send(Outgoing::Frame(Frame::signal(name, args)));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Most calls ever observed awaiting an answer at once
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_client(stream: TcpStream, format: WireFormat, state: Arc<Mutex<ServerState>>) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbox, mut queue) = mpsc::unbounded_channel::<Outgoing>();
    state.lock().unwrap().outbox = Some(outbox.clone());

    let writer_task = tokio::spawn(async move {
        while let Some(outgoing) = queue.recv().await {
            let written = match outgoing {
                Outgoing::Frame(frame) => write_frame(&mut writer, &frame, format).await.is_ok(),
                Outgoing::Raw(bytes) => writer.write_all(&bytes).await.is_ok() && writer.flush().await.is_ok(),
            };
            if !written {
                break;
            }
        }
    });

    while let Ok(Some(frame)) = read_frame(&mut reader, format).await {
        match frame {
            Frame::Hello { .. } => {
                let _ = outbox.send(Outgoing::Frame(Frame::Welcome {
                    protocol: PROTOCOL_VERSION,
                }));
            }
            Frame::Call { serial, method, args } => {
                let script = {
                    let mut state = state.lock().unwrap();
                    state.calls.push(RecordedCall {
                        method: method.clone(),
                        args,
                    });
                    state.in_flight += 1;
                    state.max_in_flight = state.max_in_flight.max(state.in_flight);
                    state.scripts.get(&method).cloned()
                };

                match script {
                    Some(Script::Reply(value)) => answer(&state, &outbox, serial, value),
                    Some(Script::Fail { name, message }) => {
                        state.lock().unwrap().in_flight -= 1;
                        let _ = outbox.send(Outgoing::Frame(Frame::Error {
                            reply_to: serial,
                            name,
                            message,
                        }));
                    }
                    Some(Script::Silent) => {}
                    Some(Script::Delayed(pause, value)) => {
                        let state = state.clone();
                        let outbox = outbox.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(pause).await;
                            answer(&state, &outbox, serial, value);
                        });
                    }
                    Some(Script::SignalsFirst(signals, value)) => {
                        for signal in signals {
                            let (name, args) = signal.encode();
                            let _ = outbox.send(Outgoing::Frame(Frame::signal(name, args)));
                        }
                        answer(&state, &outbox, serial, value);
                    }
                    Some(Script::Hangup) => break,
                    Some(Script::Garbage) => {
                        state.lock().unwrap().in_flight -= 1;
                        let mut bytes = 8u32.to_be_bytes().to_vec();
                        bytes.extend_from_slice(&[0xff; 8]);
                        let _ = outbox.send(Outgoing::Raw(bytes));
                    }
                    None => {
                        state.lock().unwrap().in_flight -= 1;
                        let _ = outbox.send(Outgoing::Frame(Frame::Error {
                            reply_to: serial,
                            name: "UnknownMethod".to_string(),
                            message: format!("no such method {method}"),
                        }));
                    }
                }
            }
            _ => {}
        }
    }

    {
        // A newer client may already have replaced the outbox
        let mut state = state.lock().unwrap();
        if state.outbox.as_ref().is_some_and(|current| current.same_channel(&outbox)) {
            state.outbox = None;
        }
    }
    writer_task.abort();
}

fn answer(state: &Mutex<ServerState>, outbox: &mpsc::UnboundedSender<Outgoing>, serial: u32, value: Value) {
    {
        let mut state = state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
    let _ = outbox.send(Outgoing::Frame(Frame::Return {
        reply_to: serial,
        value,
    }));
}
