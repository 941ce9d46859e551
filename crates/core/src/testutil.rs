use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::server::ServerContext;
use crate::session::Session;
use crate::transport::ControlChannel;

/// A connected loopback pair: `(server side, client side)`.
pub(crate) fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, client)
}

/// A fresh Init session backed by a real loopback connection. Keep the
/// returned client stream alive for as long as the session is used.
pub(crate) fn test_session() -> (Arc<Session>, TcpStream) {
    let (server, client) = loopback_pair();
    let control = ControlChannel::new(&server, Duration::from_secs(1)).unwrap();
    (
        Arc::new(Session::new(control, Duration::from_secs(120))),
        client,
    )
}

pub(crate) fn test_context(config: ServerConfig) -> ServerContext {
    let ctx = ServerContext::new(config);
    ctx.running.store(true, std::sync::atomic::Ordering::SeqCst);
    ctx
}
