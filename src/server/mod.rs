//! Server module
//!
//! Handles TCP connections for the binary RPC protocol.
//! This module is responsible for accepting connections and delegating
//! frame processing to the dispatcher.

mod connection;

use crate::protocol::FrameCodec;
use crate::service::Service;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use connection::Connection;

/// Run the RPC server
///
/// Binds the given address and serves until the service shuts down.
pub async fn run(addr: &str, service: Arc<Service>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, service).await
}

/// Serve connections from an already bound listener
pub async fn serve(listener: TcpListener, service: Arc<Service>) -> anyhow::Result<()> {
    info!("kvmux RPC server listening on {}", listener.local_addr()?);

    let shutdown = service.shutdown_token();
    let codec = FrameCodec::new(service.config().max_frame);
    let call_timeout = service.config().call_timeout();

    loop {
        // Accept incoming connections
        let (socket, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => {
                info!("RPC server stopped");
                return Ok(());
            }
        };
        info!("New RPC connection from {}", addr);

        let dispatcher = service.dispatcher();
        let shutdown = shutdown.clone();
        let codec = codec.clone();

        // Spawn a new task to handle this connection
        tokio::spawn(async move {
            let mut connection = Connection::new(socket, codec);

            if let Err(e) = connection.handle(dispatcher, shutdown, call_timeout).await {
                error!("Connection error from {}: {}", addr, e);
            }

            info!("Connection closed: {}", addr);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::{Data, Frame, Method, Request, Response, SetData, WireItem};
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    async fn start() -> (Arc<Service>, SocketAddr) {
        let service = Arc::new(Service::from_config(&Config::default()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, service.clone()));
        (service, addr)
    }

    async fn call(client: &mut Framed<TcpStream, FrameCodec>, frame: Frame) -> Frame {
        client.send(frame).await.unwrap();
        client.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_over_tcp() {
        let (service, addr) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, FrameCodec::default());

        let set = Request::Set(SetData {
            items: vec![WireItem::new("greeting", "hello", "60")],
            storages: vec!["memory".into()],
        });
        let reply = call(&mut client, set.encode(1)).await;
        assert_eq!(reply.seq, 1);
        assert_eq!(Response::decode(&reply).unwrap(), Response::Done(Method::Set));

        let get = Request::Get(Data::new("memory", &["greeting"]));
        let reply = call(&mut client, get.encode(2)).await;
        assert_eq!(reply.seq, 2);
        assert_eq!(
            Response::decode(&reply).unwrap(),
            Response::Get(Some(Bytes::from("hello")))
        );

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_frames_keep_order() {
        let (service, addr) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, FrameCodec::default());

        for seq in 1..=3 {
            let request = Request::Has(Data::new("memory", &["k"]));
            client.feed(request.encode(seq)).await.unwrap();
        }
        client.flush().await.unwrap();

        for seq in 1..=3 {
            let reply = client.next().await.unwrap().unwrap();
            assert_eq!(reply.seq, seq);
        }

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_frame_keeps_connection() {
        let (service, addr) = start().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = Framed::new(stream, FrameCodec::default());

        let mut bad = Request::Has(Data::new("memory", &["k"])).encode(1);
        bad.checksum = bad.checksum.wrapping_add(1);
        let reply = call(&mut client, bad).await;
        assert!(Response::decode(&reply).unwrap().is_error());

        let good = Request::Has(Data::new("memory", &["k"])).encode(2);
        let reply = call(&mut client, good).await;
        assert_eq!(
            Response::decode(&reply).unwrap(),
            Response::Has(vec![("k".into(), false)])
        );

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let service = Arc::new(Service::from_config(&Config::default()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let handle = tokio::spawn(serve(listener, service.clone()));

        service.shutdown().await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
