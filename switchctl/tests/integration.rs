//! Controller and connection tests against a scripted server over TCP

use std::sync::Arc;
use std::time::Duration;

use shared::{CompositeMode, FaceRect, Signal, Value, VideoChannel, WireFormat};
use switchctl::{
    ConnectOptions, Connection, ConnectionError, ConnectionState, ControlAddress, Controller, SignalDispatcher,
    SwitchError,
};
use tokio::sync::mpsc;

mod common;
use common::{FakeServer, Script, TestFixtures};

async fn connected(server: &FakeServer) -> Controller {
    let mut controller = Controller::with_options(server.address().clone(), TestFixtures::options());
    controller.establish_connection().await.unwrap();
    controller
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for signal delivery")
        .expect("handler channel closed")
}

#[tokio::test]
async fn test_query_before_connect_is_connection_error() {
    let controller = Controller::new(ControlAddress::parse("tcp:host=127.0.0.1,port=5000").unwrap());

    let err = tokio_test::assert_err!(controller.get_compose_port().await);
    assert!(err.is_connection());
    assert!(!err.is_remote());
}

#[tokio::test]
async fn test_unreachable_server_leaves_controller_unusable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let address = ControlAddress::parse(&format!("127.0.0.1:{port}")).unwrap();

    let mut controller = Controller::with_options(address, TestFixtures::options());
    let err = controller.establish_connection().await.unwrap_err();
    assert!(matches!(err, SwitchError::Connection(ConnectionError::Connect { .. })));
    assert!(!controller.is_connected());
    assert!(matches!(
        controller.get_audio_port().await,
        Err(SwitchError::Connection(ConnectionError::NotConnected))
    ));
}

#[tokio::test]
async fn test_port_queries() {
    let server = FakeServer::start().await;
    server
        .reply("get_compose_port", TestFixtures::COMPOSE_PORT)
        .reply("get_encode_port", Value::Tuple(vec![Value::from(TestFixtures::ENCODE_PORT)]))
        .reply("get_audio_port", TestFixtures::AUDIO_PORT)
        .reply(
            "get_preview_ports",
            Value::Array(vec![
                Value::Tuple(vec![3003.into(), 1.into(), 7.into()]),
                Value::Tuple(vec![3004.into(), 1.into(), 8.into()]),
            ]),
        );

    let controller = connected(&server).await;
    assert!(controller.is_connected());
    assert_eq!(controller.get_compose_port().await.unwrap(), 3001);
    assert_eq!(controller.get_encode_port().await.unwrap(), 3002);
    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);

    let previews: Vec<_> = controller
        .get_preview_ports()
        .await
        .unwrap()
        .into_iter()
        .map(|p| (p.port, p.serve, p.type_code))
        .collect();
    assert_eq!(previews, vec![(3003, 1, 7), (3004, 1, 8)]);
}

#[tokio::test]
async fn test_commands_encode_arguments() {
    let server = FakeServer::start().await;
    server
        .reply("set_composite_mode", true)
        .reply("switch", true)
        .reply("adjust_pip", 1i64)
        .reply("click_video", false)
        .reply("new_record", true)
        .reply("mark_face", Value::Unit)
        .reply("mark_tracking", Value::Unit)
        .reply("get_composite_mode", 2i64);

    let controller = connected(&server).await;
    assert!(tokio_test::assert_ok!(controller.set_composite_mode(CompositeMode::PictureInPicture).await));
    assert!(controller.switch(VideoChannel::B, 3004).await.unwrap());
    assert_eq!(controller.adjust_pip(10, 20, 160, 120).await.unwrap(), 1);
    assert!(!controller.click_video(0, 0, 320, 240).await.unwrap());
    assert!(controller.new_record().await.unwrap());
    controller.mark_face(&TestFixtures::faces()).await.unwrap();
    controller.mark_tracking(&[]).await.unwrap();
    assert_eq!(controller.get_composite_mode().await.unwrap(), CompositeMode::DualPreview);

    let calls = server.calls();
    let args_of = |method: &str| calls.iter().find(|c| c.method == method).unwrap().args.clone();
    assert_eq!(args_of("set_composite_mode"), vec![Value::Int(1)]);
    assert_eq!(args_of("switch"), vec![Value::Int(66), Value::Int(3004)]);
    assert_eq!(args_of("adjust_pip"), vec![10.into(), 20.into(), 160.into(), 120.into()]);
    assert_eq!(
        args_of("mark_face"),
        vec![Value::Array(vec![
            Value::Tuple(vec![10.into(), 20.into(), 100.into(), 120.into()]),
            Value::Tuple(vec![300.into(), 40.into(), 80.into(), 90.into()]),
        ])]
    );
    assert_eq!(args_of("mark_tracking"), vec![Value::Array(vec![])]);
}

#[tokio::test]
async fn test_rejected_mode_change_is_not_an_error() {
    let server = FakeServer::start().await;
    server.reply("set_composite_mode", false);

    let controller = connected(&server).await;
    assert!(!controller.set_composite_mode(CompositeMode::DualEqual).await.unwrap());
    assert!(controller.is_connected());
}

#[tokio::test]
async fn test_remote_error_keeps_channel_healthy() {
    let server = FakeServer::start().await;
    server
        .on(
            "new_record",
            Script::Fail {
                name: "RecordError".into(),
                message: "sink unavailable".into(),
            },
        )
        .reply("get_audio_port", 4000i64);

    let controller = connected(&server).await;
    match controller.new_record().await {
        Err(SwitchError::Remote(e)) => {
            assert_eq!(e.method, "new_record");
            assert_eq!(e.name, "RecordError");
            assert_eq!(e.message, "sink unavailable");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    // Unscripted methods are remote failures too
    assert!(controller.click_video(1, 1, 1, 1).await.unwrap_err().is_remote());
    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);
}

#[tokio::test]
async fn test_wrong_reply_shape_is_reported() {
    let server = FakeServer::start().await;
    server.reply("get_compose_port", "3001");

    let controller = connected(&server).await;
    assert!(matches!(
        controller.get_compose_port().await,
        Err(SwitchError::Connection(ConnectionError::UnexpectedReply { .. }))
    ));
}

#[tokio::test]
async fn test_signals_interleaved_with_reply() {
    let server = FakeServer::start().await;
    server.on(
        "get_audio_port",
        Script::SignalsFirst(
            vec![
                Signal::PreviewPortAdded {
                    port: 3003,
                    serve: 1,
                    type_code: 7,
                },
                Signal::PreviewPortAdded {
                    port: 3004,
                    serve: 1,
                    type_code: 8,
                },
            ],
            Value::Int(4000),
        ),
    );

    let controller = connected(&server).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.on_preview_port_added(move |port, serve, type_code| {
        let _ = tx.send((port, serve, type_code));
    });

    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);
    assert_eq!(recv(&mut rx).await, (3003, 1, 7));
    assert_eq!(recv(&mut rx).await, (3004, 1, 8));
}

#[tokio::test]
async fn test_unsolicited_signals_reach_handlers_in_order() {
    let server = FakeServer::start().await;
    let controller = connected(&server).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for id in 0..3 {
        let tx = tx.clone();
        controller.on_preview_port_added(move |port, serve, type_code| {
            let _ = tx.send((id, port, serve, type_code));
        });
    }
    let mode_tx = tx.clone();
    controller.on_new_mode_online(move |mode| {
        let _ = mode_tx.send((99, mode.code() as u16, 0, 0));
    });

    server.emit(&Signal::PreviewPortAdded {
        port: 3003,
        serve: 1,
        type_code: 7,
    });
    server.emit_raw("not-a-signal", vec![Value::Int(1)]);
    server.emit_raw("new-mode-online", vec![Value::Str("bogus".into())]);
    server.emit(&Signal::NewModeOnline {
        mode: CompositeMode::DualEqual,
    });

    assert_eq!(recv(&mut rx).await, (0, 3003, 1, 7));
    assert_eq!(recv(&mut rx).await, (1, 3003, 1, 7));
    assert_eq!(recv(&mut rx).await, (2, 3003, 1, 7));
    assert_eq!(recv(&mut rx).await, (99, 3, 0, 0));
}

#[tokio::test]
async fn test_face_and_select_signals() {
    let server = FakeServer::start().await;
    let controller = connected(&server).await;

    let (face_tx, mut faces) = mpsc::unbounded_channel::<Vec<FaceRect>>();
    controller.on_show_face_marker(move |marked| {
        let _ = face_tx.send(marked.to_vec());
    });
    let (select_tx, mut selects) = mpsc::unbounded_channel();
    controller.on_select_face(move |x, y| {
        let _ = select_tx.send((x, y));
    });

    server.emit(&Signal::ShowFaceMarker {
        faces: TestFixtures::faces(),
    });
    server.emit(&Signal::SelectFace { x: 12, y: 34 });

    assert_eq!(recv(&mut faces).await, TestFixtures::faces());
    assert_eq!(recv(&mut selects).await, (12, 34));
}

#[tokio::test]
async fn test_close_fails_blocked_call_and_reconnect_works() {
    let server = FakeServer::start().await;
    server
        .on("get_compose_port", Script::Silent)
        .reply("get_audio_port", 4000i64);

    let dispatcher = Arc::new(SignalDispatcher::new());
    let connection = Arc::new(
        Connection::connect(server.address(), TestFixtures::options(), dispatcher.clone())
            .await
            .unwrap(),
    );

    let caller = connection.clone();
    let blocked = tokio::spawn(async move { caller.call("get_compose_port", vec![]).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    connection.close().await;
    let result = blocked.await.unwrap();
    assert!(matches!(result, Err(SwitchError::Connection(ConnectionError::Closed))));
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        connection.call("get_audio_port", vec![]).await,
        Err(SwitchError::Connection(ConnectionError::Closed))
    ));

    let fresh = Connection::connect(server.address(), TestFixtures::options(), dispatcher)
        .await
        .unwrap();
    assert_eq!(fresh.call("get_audio_port", vec![]).await.unwrap(), Value::Int(4000));
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_timeout_releases_call_slot() {
    let server = FakeServer::start().await;
    server
        .on("get_compose_port", Script::Silent)
        .reply("get_audio_port", 4000i64);

    let options = TestFixtures::options_with_call_timeout(Duration::from_millis(200));
    let mut controller = Controller::with_options(server.address().clone(), options);
    controller.establish_connection().await.unwrap();

    match controller.get_compose_port().await {
        Err(SwitchError::Connection(ConnectionError::Timeout { method, timeout })) => {
            assert_eq!(method, "get_compose_port");
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(controller.is_connected());
    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);
}

#[tokio::test]
async fn test_late_reply_is_not_attributed_to_next_call() {
    let server = FakeServer::start().await;
    server
        .on("get_compose_port", Script::Delayed(Duration::from_millis(400), Value::Int(3001)))
        .on("get_audio_port", Script::Delayed(Duration::from_millis(500), Value::Int(4000)));

    let connection = Connection::connect(
        server.address(),
        TestFixtures::options(),
        Arc::new(SignalDispatcher::new()),
    )
    .await
    .unwrap();

    let err = connection
        .call_with_timeout("get_compose_port", vec![], Duration::from_millis(150))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::Connection(ConnectionError::Timeout { .. })));

    // The compose reply lands while this call is outstanding and must be dropped
    let value = connection
        .call_with_timeout("get_audio_port", vec![], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(value, Value::Int(4000));
}

#[tokio::test]
async fn test_concurrent_calls_are_serialized() {
    let server = FakeServer::start().await;
    for method in ["get_compose_port", "get_encode_port", "get_audio_port"] {
        server.on(method, Script::Delayed(Duration::from_millis(50), Value::Int(3000)));
    }

    let controller = Arc::new(connected(&server).await);
    let (a, b, c) = tokio::join!(
        controller.get_compose_port(),
        controller.get_encode_port(),
        controller.get_audio_port()
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(server.calls().len(), 3);
    assert_eq!(server.max_in_flight(), 1);
}

#[tokio::test]
async fn test_server_hangup_fails_pending_call() {
    let server = FakeServer::start().await;
    server.on("new_record", Script::Hangup);

    let controller = connected(&server).await;
    let err = controller.new_record().await.unwrap_err();
    assert!(err.is_connection());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.state(), ConnectionState::Closed);
    assert!(controller.get_audio_port().await.unwrap_err().is_connection());
}

#[tokio::test]
async fn test_malformed_reply_closes_connection() {
    let server = FakeServer::start().await;
    server.on("get_compose_port", Script::Garbage);

    let controller = connected(&server).await;
    match controller.get_compose_port().await {
        Err(SwitchError::Connection(ConnectionError::MalformedFrame(_))) => {}
        other => panic!("expected malformed frame, got {other:?}"),
    }
    assert_eq!(controller.state(), ConnectionState::Closed);
    assert!(controller.get_audio_port().await.unwrap_err().is_connection());
}

#[tokio::test]
async fn test_cancelled_call_leaves_channel_usable() {
    let server = FakeServer::start().await;
    server
        .on("set_composite_mode", Script::Delayed(Duration::from_millis(100), Value::Bool(true)))
        .reply("get_audio_port", 4000i64);

    let controller = connected(&server).await;
    // Dropped while its frame is still queued for the socket
    let cancelled = tokio::time::timeout(
        Duration::ZERO,
        controller.set_composite_mode(CompositeMode::DualEqual),
    )
    .await;
    assert!(cancelled.is_err());

    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);
    let calls = server.calls();
    assert_eq!(calls[0].method, "set_composite_mode");
    assert_eq!(calls[1].method, "get_audio_port");
    assert!(controller.is_connected());
}

#[tokio::test]
async fn test_json_wire_format() {
    let server = FakeServer::start_with_format(WireFormat::Json).await;
    server.reply("get_audio_port", 4000i64);

    let options = ConnectOptions {
        wire_format: WireFormat::Json,
        ..TestFixtures::options()
    };
    let mut controller = Controller::with_options(server.address().clone(), options);
    controller.establish_connection().await.unwrap();
    assert_eq!(controller.get_audio_port().await.unwrap(), 4000);
}

#[tokio::test]
async fn test_registrations_survive_reconnect() {
    let server = FakeServer::start().await;
    let mut controller = connected(&server).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.on_select_face(move |x, y| {
        let _ = tx.send((x, y));
    });

    controller.establish_connection().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.emit(&Signal::SelectFace { x: 5, y: 6 });
    assert_eq!(recv(&mut rx).await, (5, 6));
}
