//! Scripted FreeSWITCH peer for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One side of an ESL conversation, played by the test.
pub struct MockPeer {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl MockPeer {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    /// Read one command frame (up to and including the blank line).
    pub async fn read_command(&mut self) -> String {
        loop {
            if let Some(pos) = self
                .buf
                .windows(2)
                .position(|w| w == b"\n\n")
            {
                let frame: Vec<u8> = self
                    .buf
                    .drain(..pos + 2)
                    .collect();
                return String::from_utf8(frame).unwrap();
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for a command")
                .unwrap();
            assert!(n > 0, "client closed the socket");
            self.buf
                .extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn send(&mut self, data: &str) {
        self.stream
            .write_all(data.as_bytes())
            .await
            .unwrap();
    }

    pub async fn reply(&mut self, reply_text: &str) {
        self.send(&format!(
            "Content-Type: command/reply\nReply-Text: {}\n\n",
            reply_text
        ))
        .await;
    }

    pub async fn api_response(&mut self, body: &str) {
        self.send(&format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        ))
        .await;
    }

    /// Send a `text/event-plain` frame built from `headers` and an optional body.
    pub async fn event(&mut self, headers: &[(&str, &str)], body: Option<&str>) {
        self.send(&plain_event(headers, body))
            .await;
    }

    /// Close the socket from the server side.
    pub async fn hang_up(mut self) {
        let _ = self
            .stream
            .shutdown()
            .await;
    }
}

pub fn plain_event(headers: &[(&str, &str)], body: Option<&str>) -> String {
    let mut inner = String::new();
    for (name, value) in headers {
        inner.push_str(&format!("{}: {}\n", name, value.replace(' ', "%20")));
    }
    if let Some(body) = body {
        inner.push_str(&format!("Content-Length: {}\n\n{}", body.len(), body));
    } else {
        inner.push('\n');
    }
    format!(
        "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
        inner.len(),
        inner
    )
}

/// Listening mock of an inbound event socket.
pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0")
                .await
                .unwrap(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .unwrap()
    }

    pub fn listener(&self) -> &TcpListener {
        &self.listener
    }

    pub fn port(&self) -> u16 {
        self.addr()
            .port()
    }

    /// Accept one client and send `auth/request`.
    pub async fn accept(&self) -> MockPeer {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .unwrap();
        let mut peer = MockPeer::new(stream);
        peer.send("Content-Type: auth/request\n\n")
            .await;
        peer
    }

    /// Accept one client and accept any password.
    pub async fn accept_authenticated(&self) -> MockPeer {
        let mut peer = self
            .accept()
            .await;
        let auth = peer
            .read_command()
            .await;
        assert!(auth.starts_with("auth "), "unexpected auth frame: {:?}", auth);
        peer.reply("+OK accepted")
            .await;
        peer
    }
}

/// Connect a client to a fresh mock server; returns both ends.
pub async fn connected() -> (freeswitch_esl_engine::EslClient, MockPeer) {
    let server = MockServer::bind().await;
    let port = server.port();
    let (client, peer) = tokio::join!(
        freeswitch_esl_engine::EslClient::connect("127.0.0.1", port, "ClueCon"),
        server.accept_authenticated()
    );
    (client.unwrap(), peer)
}
