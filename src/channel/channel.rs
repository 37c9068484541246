use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::channel::{ChannelState, Role};
use crate::codec::{WebSocketCodec, read_http_head};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{
    ClientRequest, FrameHeader, HandshakeResponse, HttpRequestHead, MAX_CONTROL_FRAME_PAYLOAD,
    Negotiation, OpCode,
};
use crate::transcode::{TextTranscoder, Utf8Passthrough};

/// Run `fut` under an optional deadline.
pub(crate) async fn with_timeout<R>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<R>>,
) -> Result<R> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await?,
        None => fut.await,
    }
}

/// Metadata of the payload left in the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Opcode of the frame, or of the whole message after `receive_all`.
    pub opcode: OpCode,
    /// Payload size after transcoding.
    pub size: usize,
    /// FIN bit.
    pub fin: bool,
}

/// Result of [`WebSocketChannel::get_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOut {
    /// Bytes copied into the caller's buffer.
    pub copied: usize,
    /// More data was available than fit.
    pub truncated: bool,
}

/// Outcome of [`WebSocketChannel::open_as_server`].
pub enum ServerOpen<T> {
    /// The upgrade completed.
    Established(WebSocketChannel<T>),
    /// The peer sent an ordinary HTTP request. The stream is handed back
    /// untouched after the request head.
    PlainHttp {
        /// The transport.
        io: T,
        /// The parsed request head.
        request: HttpRequestHead,
    },
}

/// An RFC 6455 channel over an async byte stream.
///
/// The channel owns one receive buffer and one auxiliary buffer for
/// transcoding. Both grow as needed and never shrink. PING frames are
/// answered and PONG frames are skipped without the caller seeing them.
///
/// ## Example
///
/// ```rust,ignore
/// use csap::{Config, OpCode, WebSocketChannel};
///
/// let mut channel = WebSocketChannel::connect(Config::client(), "localhost", 8080).await?;
/// channel.send(OpCode::Text, b"hello", true).await?;
/// let info = channel.receive(None).await?;
/// println!("{} bytes: {:?}", info.size, channel.data());
/// ```
pub struct WebSocketChannel<T> {
    codec: WebSocketCodec<T>,
    config: Config,
    state: ChannelState,
    recv_buf: Vec<u8>,
    aux_buf: Vec<u8>,
    in_message: Option<OpCode>,
    out_message: Option<OpCode>,
    transcoder: Arc<dyn TextTranscoder>,
    // UTF-8 sequence split across text fragments
    utf8_tail: Vec<u8>,
}

impl<T> WebSocketChannel<T> {
    /// Wrap a stream on which the upgrade has already completed.
    pub fn new(io: T, role: Role, config: Config) -> Self {
        let codec = WebSocketCodec::new(io, role, &config);
        Self::from_codec(codec, config)
    }

    fn from_codec(codec: WebSocketCodec<T>, config: Config) -> Self {
        Self {
            recv_buf: Vec::with_capacity(config.read_buffer_size),
            aux_buf: Vec::new(),
            codec,
            config,
            state: ChannelState::Open,
            in_message: None,
            out_message: None,
            transcoder: Arc::new(Utf8Passthrough),
            utf8_tail: Vec::new(),
        }
    }

    /// Replace the text transcoder.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn TextTranscoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether frames can still be sent.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Which end of the connection this is.
    pub fn role(&self) -> Role {
        self.codec.role()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Zero-copy view of the last received payload.
    ///
    /// The borrow must end before the next `receive`, which reuses the buffer.
    pub fn data(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Copy the last payload, starting at `offset`, into `buf`.
    ///
    /// At most `buf.len()` bytes are copied; `truncated` reports whether
    /// more were available.
    pub fn get_data(&self, offset: usize, buf: &mut [u8]) -> CopyOut {
        let available = self.recv_buf.get(offset..).unwrap_or_default();
        let copied = available.len().min(buf.len());
        buf[..copied].copy_from_slice(&available[..copied]);
        CopyOut {
            copied,
            truncated: available.len() > buf.len(),
        }
    }

    /// Underlying transport.
    pub fn get_ref(&self) -> &T {
        self.codec.get_ref()
    }

    /// Take back the transport.
    pub fn into_inner(self) -> T {
        self.codec.into_inner()
    }

    fn ensure_can_send(&self) -> Result<()> {
        match self.state {
            ChannelState::Open => Ok(()),
            ChannelState::Broken => Err(Error::ChannelBroken),
            ChannelState::Closing | ChannelState::Closed => Err(Error::ConnectionClosed(None)),
        }
    }

    fn ensure_can_receive(&self) -> Result<()> {
        match self.state {
            ChannelState::Open | ChannelState::Closing => Ok(()),
            ChannelState::Broken => Err(Error::ChannelBroken),
            ChannelState::Closed => Err(Error::ConnectionClosed(None)),
        }
    }

    /// Update state after a receive attempt.
    ///
    /// A timeout before any byte of a frame was consumed leaves the channel
    /// usable; anything that leaves the stream position unknown breaks it.
    fn settle<R>(&mut self, result: Result<R>, whole_message: bool) -> Result<R> {
        if let Err(ref err) = result {
            match err {
                Error::ConnectionClosed(_) => self.state = ChannelState::Closed,
                Error::Timeout
                    if !self.codec.is_mid_frame()
                        && !(whole_message && self.in_message.is_some()) => {}
                Error::InvalidUtf8 | Error::Transcode(_) if !self.codec.is_mid_frame() => {}
                _ => {
                    warn!(error = %err, "channel broken on receive");
                    self.state = ChannelState::Broken;
                }
            }
        }
        result
    }

    fn transcode_inbound(&mut self) -> Result<()> {
        if self.transcoder.is_identity() {
            return Ok(());
        }
        self.aux_buf.clear();
        self.transcoder.to_local(&self.recv_buf, &mut self.aux_buf)?;
        std::mem::swap(&mut self.recv_buf, &mut self.aux_buf);
        Ok(())
    }

    /// Transcode one text fragment, holding back a UTF-8 sequence cut off
    /// at the end of a non-final fragment until the next one arrives.
    fn transcode_fragment(&mut self, fin: bool) -> Result<()> {
        if self.transcoder.is_identity() {
            return Ok(());
        }
        if !self.utf8_tail.is_empty() {
            let (held, len) = (self.utf8_tail.len(), self.recv_buf.len());
            self.recv_buf.resize(len + held, 0);
            self.recv_buf.copy_within(..len, held);
            self.recv_buf[..held].copy_from_slice(&self.utf8_tail);
            self.utf8_tail.clear();
        }
        if !fin {
            let at = self.recv_buf.len() - incomplete_utf8_tail(&self.recv_buf);
            self.utf8_tail.extend_from_slice(&self.recv_buf[at..]);
            self.recv_buf.truncate(at);
        }
        self.transcode_inbound()
    }
}

/// Length of a UTF-8 sequence cut off at the end of `buf`.
fn incomplete_utf8_tail(buf: &[u8]) -> usize {
    match std::str::from_utf8(buf) {
        Err(e) if e.error_len().is_none() => buf.len() - e.valid_up_to(),
        _ => 0,
    }
}

impl WebSocketChannel<TcpStream> {
    /// Connect to `host:port` and run the client upgrade.
    ///
    /// The TCP connect and the upgrade each run under the handshake timeout.
    ///
    /// # Errors
    ///
    /// - `Error::Io` / `Error::Timeout` if the connection cannot be made
    /// - errors from [`open_as_client`](Self::open_as_client)
    pub async fn connect(config: Config, host: &str, port: u16) -> Result<Self> {
        let stream = with_timeout(config.timeouts.handshake, async {
            Ok(TcpStream::connect((host, port)).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        Self::open_as_client(stream, config, &format!("{host}:{port}")).await
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> WebSocketChannel<T> {
    /// Run the server side of the upgrade on a freshly accepted stream.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandshake` if the head is not parseable HTTP or the
    ///   upgrade request is incomplete
    /// - `Error::NoUpgradeProtocol` if `Upgrade` is missing
    /// - `Error::UnsupportedUpgrade` if `Upgrade` names another protocol
    /// - `Error::HandshakeTooLarge`, `Error::Timeout`, `Error::Io`
    pub async fn open_as_server(mut io: T, config: Config) -> Result<ServerOpen<T>> {
        let limit = config.timeouts.handshake;
        with_timeout(limit, async move {
            let mut buf = BytesMut::with_capacity(1024);
            let head = read_http_head(&mut io, &mut buf, config.limits.max_handshake_size).await?;
            let head = HttpRequestHead::parse(&head)?;

            match Negotiation::classify(head)? {
                Negotiation::PlainHttp(request) => {
                    debug!(method = %request.method, path = %request.path, "plain HTTP request");
                    Ok(ServerOpen::PlainHttp { io, request })
                }
                Negotiation::Upgrade(request) => {
                    let mut out = Vec::with_capacity(192);
                    HandshakeResponse::from_request(&request).write(&mut out);
                    io.write_all(&out).await?;
                    io.flush().await?;
                    debug!(path = %request.path, host = %request.host, "websocket upgrade accepted");

                    let codec = WebSocketCodec::with_read_buf(io, Role::Server, &config, buf);
                    Ok(ServerOpen::Established(Self::from_codec(codec, config)))
                }
            }
        })
        .await
    }

    /// Run the client side of the upgrade on a connected stream.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandshake` if the server does not answer 101 with
    ///   the expected accept key
    /// - `Error::HandshakeTooLarge`, `Error::Timeout`, `Error::Io`
    pub async fn open_as_client(mut io: T, config: Config, host: &str) -> Result<Self> {
        let request = ClientRequest::new(host)?;
        let limit = config.timeouts.handshake;
        with_timeout(limit, async move {
            let mut out = Vec::with_capacity(256);
            request.write(&mut out);
            io.write_all(&out).await?;
            io.flush().await?;

            let mut buf = BytesMut::with_capacity(1024);
            let head = read_http_head(&mut io, &mut buf, config.limits.max_handshake_size).await?;
            HandshakeResponse::parse(&head, &request.key)?;
            debug!(host = %request.host, "websocket upgrade completed");

            let codec = WebSocketCodec::with_read_buf(io, Role::Client, &config, buf);
            Ok(Self::from_codec(codec, config))
        })
        .await
    }

    /// Send one frame.
    ///
    /// Text frames, and continuations of a text message, are transcoded to
    /// UTF-8 first. Binary payloads go out untouched. Control frames must
    /// have `fin` set and at most 125 bytes.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` / `Error::ChannelBroken` if the channel is not open
    /// - `Error::ProtocolViolation` for a continuation with no message in
    ///   progress, or a new message while one is unfinished
    /// - `Error::Io` / `Error::Timeout` if the write fails; the channel is
    ///   then broken
    pub async fn send(&mut self, opcode: OpCode, payload: &[u8], fin: bool) -> Result<()> {
        self.ensure_can_send()?;

        let kind = match opcode {
            OpCode::Continuation => self.out_message.ok_or_else(|| {
                Error::ProtocolViolation("Continuation frame without an open message".into())
            })?,
            OpCode::Text | OpCode::Binary if self.out_message.is_some() => {
                return Err(Error::ProtocolViolation(
                    "New message started before the previous one finished".into(),
                ));
            }
            _ => opcode,
        };
        if opcode.is_control() {
            if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(payload.len()));
            }
            if !fin {
                return Err(Error::FragmentedControlFrame);
            }
        }

        let limit = self.config.timeouts.write;
        let result = if kind == OpCode::Text && !self.transcoder.is_identity() {
            self.aux_buf.clear();
            self.transcoder.to_utf8(payload, &mut self.aux_buf)?;
            with_timeout(limit, self.codec.write_frame(fin, opcode, &self.aux_buf)).await
        } else {
            with_timeout(limit, self.codec.write_frame(fin, opcode, payload)).await
        };

        if let Err(err) = result {
            warn!(error = %err, %opcode, "channel broken on send");
            self.state = ChannelState::Broken;
            return Err(err);
        }
        if opcode.is_data() {
            self.out_message = (!fin).then_some(kind);
        }
        Ok(())
    }

    /// Send an application PING.
    pub async fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.send(OpCode::Ping, payload, true).await
    }

    /// Read frames until the next data frame and return its header.
    ///
    /// PING is answered with a PONG carrying the same payload, PONG is
    /// dropped, CLOSE is echoed and reported as `ConnectionClosed`.
    async fn next_data_header(&mut self) -> Result<FrameHeader> {
        loop {
            let header = self.codec.read_header().await?;
            match header.opcode {
                OpCode::Ping => {
                    let mut payload = Vec::with_capacity(header.payload_len);
                    self.codec.read_payload(&header, &mut payload).await?;
                    debug!(len = payload.len(), "ping received");
                    if self.state.can_send() {
                        self.codec.write_frame(true, OpCode::Pong, &payload).await?;
                    }
                }
                OpCode::Pong => {
                    let mut payload = Vec::with_capacity(header.payload_len);
                    self.codec.read_payload(&header, &mut payload).await?;
                    debug!(len = payload.len(), "pong received");
                }
                OpCode::Close => {
                    let mut payload = Vec::with_capacity(header.payload_len);
                    self.codec.read_payload(&header, &mut payload).await?;
                    let code = (payload.len() >= 2).then(|| u16::from_be_bytes([payload[0], payload[1]]));
                    debug!(?code, "close received");
                    if self.state == ChannelState::Open {
                        let echo = &payload[..payload.len().min(2)];
                        if let Err(err) = self.codec.write_frame(true, OpCode::Close, echo).await {
                            debug!(error = %err, "close echo not delivered");
                        }
                    }
                    return Err(Error::ConnectionClosed(code));
                }
                OpCode::Continuation if self.in_message.is_none() => {
                    return Err(Error::ProtocolViolation(
                        "Continuation frame without an open message".into(),
                    ));
                }
                OpCode::Text | OpCode::Binary if self.in_message.is_some() => {
                    return Err(Error::ProtocolViolation(
                        "New data frame inside a fragmented message".into(),
                    ));
                }
                OpCode::Continuation | OpCode::Text | OpCode::Binary => return Ok(header),
            }
        }
    }

    async fn receive_frame(&mut self) -> Result<FrameInfo> {
        self.recv_buf.clear();
        let header = self.next_data_header().await?;
        if self.in_message.is_none() {
            self.utf8_tail.clear();
        }
        let kind = self.in_message.unwrap_or(header.opcode);
        self.codec.read_payload(&header, &mut self.recv_buf).await?;
        self.in_message = (!header.fin).then_some(kind);
        if kind == OpCode::Text {
            self.transcode_fragment(header.fin)?;
        }
        Ok(FrameInfo {
            opcode: header.opcode,
            size: self.recv_buf.len(),
            fin: header.fin,
        })
    }

    /// Receive the next data frame into the receive buffer.
    ///
    /// Control frames are handled internally and never returned. `timeout`
    /// bounds the whole call; `None` waits forever.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if the peer sent CLOSE or the stream ended
    /// - `Error::Timeout` if the deadline passed
    /// - protocol errors for malformed or truncated frames
    pub async fn receive(&mut self, timeout: Option<Duration>) -> Result<FrameInfo> {
        self.ensure_can_receive()?;
        let result = with_timeout(timeout, self.receive_frame()).await;
        self.settle(result, false)
    }

    async fn receive_message(&mut self) -> Result<FrameInfo> {
        self.recv_buf.clear();
        if self.in_message.is_some() {
            self.recv_buf.append(&mut self.utf8_tail);
        }
        let limits = self.config.limits.clone();
        let mut frames = 0usize;
        loop {
            let header = self.next_data_header().await?;
            let kind = self.in_message.unwrap_or(header.opcode);
            frames += 1;
            limits.check_fragment_count(frames)?;
            limits.check_message_size(self.recv_buf.len() + header.payload_len)?;

            self.codec.read_payload(&header, &mut self.recv_buf).await?;
            self.in_message = (!header.fin).then_some(kind);
            if header.fin {
                if kind == OpCode::Text {
                    self.transcode_inbound()?;
                }
                return Ok(FrameInfo {
                    opcode: kind,
                    size: self.recv_buf.len(),
                    fin: true,
                });
            }
        }
    }

    /// Receive frames until FIN, concatenating them in the receive buffer.
    ///
    /// A fragmented text message is transcoded once, after reassembly.
    ///
    /// # Errors
    ///
    /// As [`receive`](Self::receive), plus `Error::MessageTooLarge` and
    /// `Error::TooManyFragments` when the message exceeds the limits.
    pub async fn receive_all(&mut self, timeout: Option<Duration>) -> Result<FrameInfo> {
        self.ensure_can_receive()?;
        let result = with_timeout(timeout, self.receive_message()).await;
        self.settle(result, true)
    }

    /// Send CLOSE (if still open) and shut the transport down.
    ///
    /// # Errors
    ///
    /// `Error::ControlFrameTooLarge` if `payload` exceeds 125 bytes, or the
    /// transport error from writing CLOSE or shutting down.
    pub async fn close(&mut self, payload: Option<&[u8]>) -> Result<()> {
        let payload = payload.unwrap_or_default();
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        if self.state == ChannelState::Closed {
            return Ok(());
        }

        let mut result = Ok(());
        if self.state == ChannelState::Open {
            self.state = ChannelState::Closing;
            let limit = self.config.timeouts.write;
            result = with_timeout(limit, self.codec.write_frame(true, OpCode::Close, payload)).await;
        }
        let shutdown = self.codec.shutdown().await;
        self.state = ChannelState::Closed;
        debug!("channel closed");
        result.and(shutdown)
    }
}
