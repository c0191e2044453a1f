use captains_log::*;
use rstest::fixture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Runtime;

use weft_rpc::runtime::AsyncIO;
use weft_rpc::{
    invoke_stream, MethodDesc, MethodDirectory, Server, StaticDirectory, Stream, StreamErr,
    StreamingMode, TransportConfig,
};

pub type RT = weft_rpc_tokio::TokioRT;
pub type TestCodec = weft_rpc_codec::MsgpCodec;

pub struct TestRunner {
    rt: Runtime,
}

impl TestRunner {
    pub fn new() -> Self {
        recipe::raw_file_logger("/tmp/weft_rpc_test.log", Level::Trace).test().build().expect("log");
        Self {
            rt: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(8)
                .enable_all()
                .build()
                .unwrap(),
        }
    }

    pub fn block_on<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        self.rt.block_on(f);
    }
}

impl fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "")
    }
}

#[fixture]
pub fn runner() -> TestRunner {
    TestRunner::new()
}

pub fn test_directory() -> Arc<StaticDirectory> {
    Arc::new(
        StaticDirectory::new()
            .with("echo", MethodDesc::new(StreamingMode::Unary))
            .with("ticks", MethodDesc::new(StreamingMode::ServerStreaming))
            .with("upload", MethodDesc::new(StreamingMode::ClientStreaming))
            .with("mirror", MethodDesc::new(StreamingMode::Bidirectional)),
    )
}

pub fn transport_pair(
    client_dir: Arc<dyn MethodDirectory>, server_dir: Arc<dyn MethodDirectory>,
) -> (weft_rpc::Client<RT>, Server<RT>) {
    let (ca, sb) = weft_rpc_tokio::duplex_pair(256 << 10);
    let client = weft_rpc::Client::new(ca, client_dir, TransportConfig::default());
    let server = Server::new(sb, server_dir, TransportConfig::default());
    (client, server)
}

/// Accept loop serving the methods of [test_directory] until the transport
/// closes. Fires `close_counter` once per finished stream.
pub fn spawn_test_service(server: Arc<Server<RT>>, close_counter: Option<Arc<AtomicUsize>>) {
    tokio::spawn(async move {
        loop {
            match server.accept_stream().await {
                Err(_) => return,
                Ok(stream) => {
                    if let Some(counter) = close_counter.as_ref() {
                        let counter = counter.clone();
                        stream.on_close(Box::new(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }));
                    }
                    tokio::spawn(async move {
                        let _ = invoke_stream(stream, handle_stream).await;
                    });
                }
            }
        }
    });
}

async fn handle_stream(stream: Arc<Stream>) -> Result<(), StreamErr> {
    let codec = TestCodec::default();
    match stream.method() {
        "echo" => {
            // unary shape: drain the request half, answer with one payload
            let mut req: Option<Vec<u8>> = None;
            loop {
                match stream.recv::<_, Vec<u8>>(&codec).await {
                    Ok(payload) => req = Some(payload),
                    Err(StreamErr::Eof) => break,
                    Err(e) => return Err(e),
                }
            }
            if req.is_none() {
                return Err(StreamErr::Codec);
            }
            stream.send(&codec, &vec![4u8, 5]).await
        }
        "ticks" => {
            let count: u32 = stream.recv(&codec).await?;
            for i in 1..=count {
                stream.send(&codec, &vec![i as u8]).await?;
            }
            Ok(())
        }
        "upload" => {
            let mut total = 0usize;
            loop {
                match stream.recv::<_, Vec<u8>>(&codec).await {
                    Ok(payload) => total += payload.len(),
                    Err(StreamErr::Eof) => break,
                    Err(e) => return Err(e),
                }
            }
            stream.send(&codec, &(total as u64)).await
        }
        "mirror" => loop {
            match stream.recv::<_, Vec<u8>>(&codec).await {
                Ok(payload) => stream.send(&codec, &payload).await?,
                Err(StreamErr::Eof) => return Ok(()),
                Err(e) => return Err(e),
            }
        },
        _ => Err(StreamErr::Unavailable),
    }
}

/// Bound a future in tests so a regression hangs the assertion, not CI.
pub async fn within<F: Future + Send>(secs: u64, f: F) -> F::Output {
    match RT::timeout(std::time::Duration::from_secs(secs), f).await {
        Ok(out) => out,
        Err(()) => panic!("test future timed out after {}s", secs),
    }
}
