// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collector transport: connected UDP or non-blocking TCP with
//! bounded connect attempts and exponential reconnect backoff.

use core::time::Duration;
use std::{
    io::{ErrorKind, Write},
    net::{TcpStream, ToSocketAddrs, UdpSocket},
    thread,
    time::Instant,
};

/// Transport selected by the exporter options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportMode {
    Udp,
    TcpNonBlocking,
}

/// Result of one send attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Sent, but only after the connection had to be re-established;
    /// the caller must resynchronize session state (sequence numbers,
    /// templates, compression stream).
    SentAfterReconnect,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub mode: TransportMode,
    /// First retry delay after a failed (re)connect
    pub reconnect_min: Duration,
    /// Backoff cap
    pub reconnect_max: Duration,
    pub verbose: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, mode: TransportMode) -> Self {
        Self {
            host: host.into(),
            port,
            mode,
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            verbose: false,
        }
    }
}

#[derive(Debug)]
enum Transport {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

/// One collector connection owned by one exporter thread
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    transport: Option<Transport>,
    last_attempt: Option<Instant>,
    backoff: Duration,
}

/// Timeout of one TCP connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn is_retryable(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut)
}

impl Connection {
    /// Creates the connection and makes a first connect attempt.
    pub fn new(config: ConnectionConfig) -> Self {
        let mut connection = Self {
            backoff: config.reconnect_min,
            config,
            transport: None,
            last_attempt: None,
        };
        connection.attempt_connect();
        connection
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn connect(&self) -> std::io::Result<Transport> {
        let target = (self.config.host.as_str(), self.config.port);

        match self.config.mode {
            TransportMode::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                socket.connect(target)?;
                Ok(Transport::Udp(socket))
            }
            TransportMode::TcpNonBlocking => {
                let mut last_error = None;
                for addr in target.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            stream.set_nonblocking(true)?;
                            return Ok(Transport::Tcp(stream));
                        }
                        Err(error) => last_error = Some(error),
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    std::io::Error::new(ErrorKind::NotFound, "address resolved to nothing")
                }))
            }
        }
    }

    fn attempt_connect(&mut self) -> bool {
        self.last_attempt = Some(Instant::now());
        match self.connect() {
            Ok(transport) => {
                if self.config.verbose {
                    tracing::info!(
                        host = %self.config.host,
                        port = self.config.port,
                        "connected to collector"
                    );
                }
                self.transport = Some(transport);
                self.backoff = self.config.reconnect_min;
                true
            }
            Err(error) => {
                if self.config.verbose {
                    tracing::warn!(
                        host = %self.config.host,
                        port = self.config.port,
                        %error,
                        "collector connection failed"
                    );
                }
                self.transport = None;
                self.backoff = (self.backoff * 2).min(self.config.reconnect_max);
                false
            }
        }
    }

    /// Attempts to re-establish a broken connection, honoring the
    /// exponential backoff between attempts.
    pub fn try_reconnect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.backoff {
                return false;
            }
        }
        self.attempt_connect()
    }

    fn send_tcp(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            match stream.write(&data[written..]) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "collector closed the stream",
                    ))
                }
                Ok(n) => written += n,
                // the caller holds the buffer; spin until the socket
                // drains or breaks
                Err(error) if is_retryable(error.kind()) => thread::yield_now(),
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Sends one complete buffer.
    ///
    /// Stream transports reconnect lazily (with backoff) and report
    /// `SentAfterReconnect` so the caller can replay session state. A
    /// hard send error marks the connection broken; the caller keeps
    /// the buffer and retries after the next reconnect.
    pub fn send(&mut self, data: &[u8]) -> SendOutcome {
        let reconnected = if !self.is_connected() {
            if self.config.mode == TransportMode::Udp || !self.try_reconnect() {
                return SendOutcome::Failed;
            }
            true
        } else {
            false
        };

        let result = match self.transport.as_mut() {
            Some(Transport::Udp(socket)) => socket.send(data).map(|_| ()),
            Some(Transport::Tcp(stream)) => Self::send_tcp(stream, data),
            None => return SendOutcome::Failed,
        };

        match result {
            Ok(()) => {
                if reconnected {
                    SendOutcome::SentAfterReconnect
                } else {
                    SendOutcome::Sent
                }
            }
            Err(error) => {
                if self.config.verbose {
                    tracing::warn!(%error, "send to collector failed");
                }
                if self.config.mode == TransportMode::TcpNonBlocking {
                    // broken stream: reconnect on a later send
                    self.transport = None;
                }
                SendOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn udp_send_reaches_the_socket() {
        let receiver = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut connection =
            Connection::new(ConnectionConfig::new("127.0.0.1", port, TransportMode::Udp));
        assert!(connection.is_connected());
        assert_eq!(connection.send(b"datagram"), SendOutcome::Sent);

        let mut buffer = [0u8; 64];
        let received = receiver.recv(&mut buffer).unwrap();
        assert_eq!(&buffer[..received], b"datagram");
    }

    #[test]
    fn tcp_send_and_reconnect_cycle() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config =
            ConnectionConfig::new("127.0.0.1", addr.port(), TransportMode::TcpNonBlocking);
        config.reconnect_min = Duration::from_millis(1);
        config.reconnect_max = Duration::from_millis(10);
        let mut connection = Connection::new(config);
        assert!(connection.is_connected());

        let (mut accepted, _) = listener.accept().unwrap();
        assert_eq!(connection.send(b"first"), SendOutcome::Sent);
        let mut buffer = [0u8; 16];
        accepted.read_exact(&mut buffer[..5]).unwrap();
        assert_eq!(&buffer[..5], b"first");

        // kill the collector side and let the send path notice
        drop(accepted);
        drop(listener);
        let mut broke = false;
        for _ in 0..50 {
            if connection.send(b"probe") == SendOutcome::Failed {
                broke = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(broke, "peer reset was never observed");
        assert!(!connection.is_connected());

        // bring a collector back on the same port and watch it recover
        let listener = TcpListener::bind(addr).unwrap();
        let mut outcome = SendOutcome::Failed;
        for _ in 0..100 {
            outcome = connection.send(b"after");
            if outcome != SendOutcome::Failed {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(outcome, SendOutcome::SentAfterReconnect);

        let (mut accepted, _) = listener.accept().unwrap();
        accepted.read_exact(&mut buffer[..5]).unwrap();
        assert_eq!(&buffer[..5], b"after");
    }
}
