mod common;

use common::*;
use captains_log::logfn;
use log::*;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use weft_rpc::runtime::AsyncIO;
use weft_rpc::{CallOptions, Client, Metadata, StreamErr, TransportConfig};
use weft_rpc_tokio::TokioConn;

#[logfn]
#[rstest]
fn test_backpressure_on_write_chan(runner: TestRunner) {
    runner.block_on(async move {
        // tiny peer buffer so the writer loop wedges on flush, and a write
        // channel of 2 so producers feel it
        let (a, b) = tokio::io::duplex(64);
        let mut config = TransportConfig::default();
        config.write_chan_capacity = 2;
        let client: Client<RT> =
            Client::new(TokioConn::new(a, "client", "peer"), test_directory(), config);

        let stream =
            client.open_stream("mirror", Metadata::new(), CallOptions::new()).await.expect("open");
        // let the writer loop flush the small header frame through
        RT::sleep(Duration::from_millis(50)).await;

        let _stream = stream.clone();
        let sender = tokio::spawn(async move {
            let codec = TestCodec::default();
            let payload = vec![0u8; 512];
            for _ in 0..4 {
                _stream.send(&codec, &payload).await.expect("send");
            }
        });
        RT::sleep(Duration::from_millis(300)).await;
        // with nobody draining the peer, four sends cannot all fit
        assert!(!sender.is_finished());

        // drain the peer: capacity frees and the sender completes
        let (mut rb, _wb) = tokio::io::split(b);
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match rb.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });
        within(5, sender).await.expect("sender");
    });
}

#[logfn]
#[rstest]
fn test_cancel_during_recv(runner: TestRunner) {
    runner.block_on(async move {
        let (a, _b) = tokio::io::duplex(64 << 10);
        let client: Client<RT> = Client::new(
            TokioConn::new(a, "client", "peer"),
            test_directory(),
            TransportConfig::default(),
        );
        let stream =
            client.open_stream("mirror", Metadata::new(), CallOptions::new()).await.expect("open");

        let _stream = stream.clone();
        let receiver = tokio::spawn(async move {
            let codec = TestCodec::default();
            let first = _stream.recv::<_, Vec<u8>>(&codec).await;
            let second = _stream.recv::<_, Vec<u8>>(&codec).await;
            (first, second)
        });
        RT::sleep(Duration::from_millis(100)).await;
        stream.cancel().await;

        let (first, second) = within(5, receiver).await.expect("receiver");
        // cancellation is distinguishable from Eof, exactly once
        assert_eq!(first.err(), Some(StreamErr::Cancelled));
        assert_eq!(second.err(), Some(StreamErr::Eof));
        info!("cancelled recv surfaced correctly");
    });
}

#[logfn]
#[rstest]
fn test_unknown_method(runner: TestRunner) {
    runner.block_on(async move {
        // the client knows "nope", the server directory does not
        let client_dir = Arc::new(
            weft_rpc::StaticDirectory::new()
                .with("nope", weft_rpc::MethodDesc::new(weft_rpc::StreamingMode::Unary)),
        );
        let (client, server) = transport_pair(client_dir, test_directory());
        let server = Arc::new(server);

        let stream =
            client.open_stream("nope", Metadata::new(), CallOptions::new()).await.expect("open");
        let trailer = within(5, stream.trailer()).await.expect("trailer");
        assert_eq!(trailer.status(), Some(StreamErr::Unavailable));
        assert_eq!(within(5, stream.recv::<_, Vec<u8>>(&TestCodec::default())).await.err(),
            Some(StreamErr::Eof));

        // nothing must reach the accept queue
        let accepted = RT::timeout(Duration::from_millis(300), server.accept_stream()).await;
        assert!(accepted.is_err());
    });
}

#[logfn]
#[rstest]
fn test_connection_loss(runner: TestRunner) {
    runner.block_on(async move {
        let (a, b) = tokio::io::duplex(64 << 10);
        let client: Client<RT> = Client::new(
            TokioConn::new(a, "client", "peer"),
            test_directory(),
            TransportConfig::default(),
        );
        let stream =
            client.open_stream("mirror", Metadata::new(), CallOptions::new()).await.expect("open");

        let _stream = stream.clone();
        let receiver = tokio::spawn(async move {
            let codec = TestCodec::default();
            _stream.recv::<_, Vec<u8>>(&codec).await
        });
        RT::sleep(Duration::from_millis(50)).await;

        // the peer goes away: reader loop sees EOF and tears the transport down
        drop(b);
        let r = within(5, receiver).await.expect("receiver");
        assert_eq!(r.err(), Some(StreamErr::Eof));

        RT::sleep(Duration::from_millis(50)).await;
        let codec = TestCodec::default();
        assert_eq!(stream.send(&codec, &vec![1u8]).await.err(), Some(StreamErr::Closed));
        assert!(!client.available());
    });
}

#[logfn]
#[rstest]
fn test_available_idle_threshold(runner: TestRunner) {
    runner.block_on(async move {
        let (a, _b) = tokio::io::duplex(1024);
        let mut config = TransportConfig::default();
        config.idle_timeout = Duration::from_millis(50);
        let client: Client<RT> =
            Client::new(TokioConn::new(a, "client", "peer"), test_directory(), config);

        assert!(client.available());
        RT::sleep(Duration::from_millis(200)).await;
        assert!(!client.available());
    });
}

#[logfn]
#[rstest]
fn test_server_close_drains_accept(runner: TestRunner) {
    runner.block_on(async move {
        let (client, server) = transport_pair(test_directory(), test_directory());
        let server = Arc::new(server);

        let stream =
            client.open_stream("mirror", Metadata::new(), CallOptions::new()).await.expect("open");
        let accepted = within(5, server.accept_stream()).await.expect("accept");
        assert_eq!(accepted.method(), "mirror");

        server.close();
        // once closed, further accepts observe Eof
        assert_eq!(within(5, server.accept_stream()).await.err(), Some(StreamErr::Eof));

        // the client side of the in-flight stream winds down with Eof
        let codec = TestCodec::default();
        assert_eq!(
            within(5, stream.recv::<_, Vec<u8>>(&codec)).await.err(),
            Some(StreamErr::Eof)
        );
    });
}
