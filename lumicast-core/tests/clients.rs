//! Both Hyperion clients against minimal servers on localhost.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use lumicast_core::client::flatbuf::{self, Command, Reply};
use lumicast_core::client::link::hyperion_codec;
use lumicast_core::client::protobuf::{self, HyperionReply, HyperionRequest};
use lumicast_core::{
    CaptureDimensions, FlatBuffersClient, Frame, GrabError, ProtoBufClient, ProtocolKind,
    ServerTarget, StreamingClient, create_client,
};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio_test::{assert_err, assert_ok};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

// ── Helpers ──────────────────────────────────────────────────────

type ServerSide = Framed<TcpStream, LengthDelimitedCodec>;

async fn ephemeral_server(protocol: ProtocolKind) -> (TcpListener, ServerTarget) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ServerTarget::new("127.0.0.1", port, protocol))
}

async fn accept(listener: &TcpListener) -> ServerSide {
    let (stream, _) = listener.accept().await.unwrap();
    Framed::new(stream, hyperion_codec())
}

async fn next_message(server: &mut ServerSide) -> Bytes {
    tokio::time::timeout(Duration::from_secs(5), server.next())
        .await
        .expect("timeout")
        .expect("client closed")
        .unwrap()
        .freeze()
}

fn test_frame() -> Frame {
    Frame::from_rgb(2, 2, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120]).unwrap()
}

// ── FlatBuffers ──────────────────────────────────────────────────

#[tokio::test]
async fn flatbuffers_register_stream_and_clear() {
    let (listener, target) = ephemeral_server(ProtocolKind::FlatBuffers).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        let mut seen = Vec::new();

        let register = flatbuf::decode_request(&next_message(&mut conn).await).unwrap();
        seen.push(register);
        let ack = Reply {
            registered: 150,
            ..Default::default()
        };
        conn.send(ack.encode()).await.unwrap();

        for _ in 0..2 {
            seen.push(flatbuf::decode_request(&next_message(&mut conn).await).unwrap());
        }
        seen
    });

    let mut client = FlatBuffersClient::new(target);
    assert_ok!(client.connect().await);
    assert!(client.is_connected());
    assert_ok!(client.send_registration(150).await);
    assert_ok!(client.send_frame(&test_frame()).await);
    assert_ok!(client.send_clear_priority(150).await);

    let seen = server.await.unwrap();
    assert_eq!(
        seen[0],
        Command::Register {
            origin: "lumicast".into(),
            priority: 150
        }
    );
    match &seen[1] {
        Command::Image {
            width,
            height,
            data,
            duration,
        } => {
            assert_eq!((*width, *height), (2, 2));
            assert_eq!(data.as_slice(), test_frame().data().as_ref());
            assert_eq!(*duration, -1);
        }
        other => panic!("expected image, got {other:?}"),
    }
    assert_eq!(seen[2], Command::Clear { priority: 150 });
}

#[tokio::test]
async fn flatbuffers_registration_skips_broadcasts() {
    let (listener, target) = ephemeral_server(ProtocolKind::FlatBuffers).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        next_message(&mut conn).await;
        let video_mode = Reply {
            video: 0,
            ..Default::default()
        };
        conn.send(video_mode.encode()).await.unwrap();
        let ack = Reply {
            registered: 150,
            ..Default::default()
        };
        conn.send(ack.encode()).await.unwrap();
        conn
    });

    let mut client = FlatBuffersClient::new(target);
    client.connect().await.unwrap();
    client.send_registration(150).await.unwrap();
    drop(server.await.unwrap());
}

#[tokio::test]
async fn flatbuffers_registration_rejected() {
    let (listener, target) = ephemeral_server(ProtocolKind::FlatBuffers).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        next_message(&mut conn).await;
        let refusal = Reply {
            error: Some("Priority 150 is already in use".into()),
            ..Default::default()
        };
        conn.send(refusal.encode()).await.unwrap();
        conn
    });

    let mut client = FlatBuffersClient::new(target);
    client.connect().await.unwrap();
    let err = client.send_registration(150).await.unwrap_err();
    assert!(matches!(err, GrabError::Rejected(ref msg) if msg.contains("already in use")));
    drop(server.await.unwrap());
}

#[tokio::test]
async fn flatbuffers_silent_server_times_out() {
    let (listener, mut target) = ephemeral_server(ProtocolKind::FlatBuffers).await;
    target.send_timeout_ms = 200;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        next_message(&mut conn).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        conn
    });

    let mut client = FlatBuffersClient::new(target);
    client.connect().await.unwrap();
    let err = client.send_registration(150).await.unwrap_err();
    assert!(matches!(err, GrabError::Timeout(_)));
    assert!(!client.is_connected());
    server.abort();
}

#[tokio::test]
async fn stalled_reader_times_out_frame_sends() {
    let (listener, mut target) = ephemeral_server(ProtocolKind::FlatBuffers).await;
    target.send_timeout_ms = 300;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        next_message(&mut conn).await;
        let ack = Reply {
            registered: 150,
            ..Default::default()
        };
        conn.send(ack.encode()).await.unwrap();
        // Keep the socket open without reading from it.
        tokio::time::sleep(Duration::from_secs(30)).await;
        conn
    });

    let mut client = FlatBuffersClient::new(target);
    client.connect().await.unwrap();
    client.send_registration(150).await.unwrap();

    let frame = Frame::black(CaptureDimensions {
        width: 960,
        height: 540,
    });
    let mut result = Ok(());
    for _ in 0..50 {
        result = client.send_frame(&frame).await;
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(GrabError::Timeout(_))), "{result:?}");
    assert!(!client.is_connected());
    server.abort();
}

#[tokio::test]
async fn server_going_away_drops_the_link() {
    let (listener, target) = ephemeral_server(ProtocolKind::FlatBuffers).await;

    let server = tokio::spawn(async move {
        let conn = accept(&listener).await;
        drop(conn);
    });

    let mut client = FlatBuffersClient::new(target);
    client.connect().await.unwrap();
    server.await.unwrap();

    let frame = test_frame();
    let mut failed = false;
    for _ in 0..100 {
        if client.send_frame(&frame).await.is_err() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(failed, "writes to a closed peer kept succeeding");
    assert!(!client.is_connected());
    assert!(matches!(
        client.send_frame(&frame).await,
        Err(GrabError::NotConnected(_))
    ));
}

// ── Protocol Buffers ─────────────────────────────────────────────

async fn reply(conn: &mut ServerSide, success: bool, error: Option<&str>) {
    let msg = HyperionReply {
        success,
        error: error.map(str::to_string),
    };
    conn.send(Bytes::from(msg.encode_to_vec())).await.unwrap();
}

#[tokio::test]
async fn protobuf_stream_and_clear() {
    let (listener, target) = ephemeral_server(ProtocolKind::ProtoBuf).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        let image = HyperionRequest::decode(next_message(&mut conn).await).unwrap();
        reply(&mut conn, true, None).await;
        let clear = HyperionRequest::decode(next_message(&mut conn).await).unwrap();
        reply(&mut conn, true, None).await;
        (image, clear)
    });

    let mut client = ProtoBufClient::new(target);
    assert_ok!(client.connect().await);
    assert_ok!(client.send_registration(120).await);
    assert_eq!(client.priority(), 120);
    assert_ok!(client.send_frame(&test_frame()).await);
    assert_ok!(client.send_clear_priority(120).await);

    let (image, clear) = server.await.unwrap();
    assert_eq!(image.command, protobuf::Command::Image as i32);
    let body = image.image_request.unwrap();
    assert_eq!((body.imagewidth, body.imageheight), (2, 2));
    assert_eq!(body.priority, 120);
    assert_eq!(body.duration, None);
    assert_eq!(body.imagedata, *test_frame().data());

    assert_eq!(clear.command, protobuf::Command::Clear as i32);
    assert_eq!(clear.clear_request.unwrap().priority, 120);
}

#[tokio::test]
async fn protobuf_clear_rejected() {
    let (listener, target) = ephemeral_server(ProtocolKind::ProtoBuf).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        next_message(&mut conn).await;
        reply(&mut conn, false, Some("no such priority")).await;
        conn
    });

    let mut client = ProtoBufClient::new(target);
    client.connect().await.unwrap();
    let err = client.send_clear_priority(150).await.unwrap_err();
    assert!(matches!(err, GrabError::Rejected(ref msg) if msg == "no such priority"));
    drop(server.await.unwrap());
}

#[tokio::test]
async fn protobuf_registration_needs_a_connection() {
    let target = ServerTarget::new("127.0.0.1", 19445, ProtocolKind::ProtoBuf);
    let mut client = ProtoBufClient::new(target);
    assert!(matches!(
        client.send_registration(150).await,
        Err(GrabError::NotConnected(_))
    ));
}

// ── Factory and connection errors ────────────────────────────────

#[tokio::test]
async fn factory_picks_protocol() {
    let (listener, target) = ephemeral_server(ProtocolKind::ProtoBuf).await;

    let server = tokio::spawn(async move {
        let mut conn = accept(&listener).await;
        HyperionRequest::decode(next_message(&mut conn).await).unwrap()
    });

    let mut client = create_client(&target);
    assert_eq!(client.target(), &target);
    client.connect().await.unwrap();
    client.send_registration(target.priority).await.unwrap();
    let black = Frame::black(CaptureDimensions {
        width: 4,
        height: 2,
    });
    client.send_frame(&black).await.unwrap();

    let request = server.await.unwrap();
    assert_eq!(request.image_request.unwrap().imagedata.len(), 4 * 2 * 3);
}

#[tokio::test]
async fn connection_refused() {
    let (listener, target) = ephemeral_server(ProtocolKind::FlatBuffers).await;
    drop(listener);

    let mut client = create_client(&target);
    let err = assert_err!(client.connect().await);
    assert!(matches!(err, GrabError::Connection(_)));
    assert!(!client.is_connected());
}
