use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::channel::WebSocketChannel;
use crate::config::Config;
use crate::csap::control::{CONTROL_FRAME_LEN, ControlFrame, Format};
use crate::csap::handshake::{HandshakeCode, HandshakeReply, NULL_SESSION_ID};
use crate::csap::target::ServiceTarget;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::transcode::TextTranscoder;

/// A CSAP session over one WebSocket channel.
///
/// Outbound, parts are gathered with [`put`](Self::put) and written by
/// [`send`](Self::send) as a control frame, an optional user-control block
/// and one frame per part. Inbound, [`receive`](Self::receive) reads the
/// control frame and user-control block, then [`get`](Self::get) or
/// [`get_data_ref`](Self::get_data_ref) pull fragments one at a time.
///
/// The session is reused across exchanges. Unread fragments of a previous
/// message are drained by the next `receive` or by `clear`, so the channel
/// never falls out of step with the peer.
pub struct CsapSession<T> {
    channel: Option<WebSocketChannel<T>>,
    config: Config,
    transcoder: Option<Arc<dyn TextTranscoder>>,
    session_id: String,
    timeout: Option<Duration>,

    // outbound
    parts: Vec<Bytes>,
    out_total: usize,
    out_max: usize,

    // inbound
    control: Option<ControlFrame>,
    offset: usize,
    user_ctl: Vec<u8>,
    user_ctl_pending: bool,
}

fn bound<T>(channel: &mut Option<WebSocketChannel<T>>) -> Result<&mut WebSocketChannel<T>> {
    channel.as_mut().ok_or(Error::ConnectionClosed(None))
}

/// Whether a failed receive still read the whole frame, leaving the channel
/// at the next frame boundary.
fn frame_consumed(err: &Error) -> bool {
    matches!(err, Error::InvalidUtf8 | Error::Transcode(_))
}

fn refused(code: HandshakeCode) -> Error {
    Error::HandshakeRefused {
        status: code.status.to_string(),
        reason: code.reason.to_string(),
    }
}

impl<T> CsapSession<T> {
    /// Unbound session. Receives wait up to `config.timeouts.read`.
    pub fn new(config: Config) -> Self {
        Self {
            channel: None,
            transcoder: None,
            session_id: NULL_SESSION_ID.to_string(),
            timeout: config.timeouts.read,
            parts: Vec::new(),
            out_total: 0,
            out_max: 0,
            control: None,
            offset: 0,
            user_ctl: Vec::with_capacity(config.user_ctl_capacity),
            user_ctl_pending: false,
            config,
        }
    }

    /// Transcoder installed on channels opened by [`open_service`](Self::open_service).
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn TextTranscoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Change the per-call receive timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Session id issued by the open-handshake, or the null id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn channel(&self) -> Option<&WebSocketChannel<T>> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut WebSocketChannel<T>> {
        self.channel.as_mut()
    }

    /// Control frame of the message being received.
    pub fn control(&self) -> Option<&ControlFrame> {
        self.control.as_ref()
    }

    /// Fragments of the current message not yet consumed.
    pub fn remaining(&self) -> usize {
        self.control
            .map_or(0, |c| c.num_fragments.saturating_sub(self.offset))
    }

    /// Bind an already-open channel and session id, resetting all counters.
    pub fn open_channel(&mut self, channel: WebSocketChannel<T>, session_id: impl Into<String>) {
        self.channel = Some(channel);
        self.session_id = session_id.into();
        self.reset();
    }

    /// Queue one outbound part.
    ///
    /// # Errors
    ///
    /// - `Error::Size` if the part is empty
    /// - `Error::Overflow` if the queued total would exceed the segment cap;
    ///   the part is not queued
    pub fn put(&mut self, part: impl Into<Bytes>) -> Result<()> {
        let part = part.into();
        if part.is_empty() {
            return Err(Error::Size("empty part".into()));
        }
        let total = self.out_total + part.len();
        self.config.limits.check_segment_size(total)?;
        self.out_total = total;
        self.out_max = self.out_max.max(part.len());
        self.parts.push(part);
        Ok(())
    }

    /// The user-control block of the current message, without I/O.
    pub fn user_ctl(&self) -> &[u8] {
        &self.user_ctl
    }

    /// Copy the user-control block into `buf`.
    ///
    /// # Errors
    ///
    /// `Error::Overflow` if `buf` is smaller than the block.
    pub fn get_user_ctl(&self, buf: &mut [u8]) -> Result<usize> {
        let len = self.user_ctl.len();
        if len > buf.len() {
            return Err(Error::Overflow {
                size: len,
                max: buf.len(),
            });
        }
        buf[..len].copy_from_slice(&self.user_ctl);
        Ok(len)
    }

    fn reset(&mut self) {
        self.parts.clear();
        self.out_total = 0;
        self.out_max = 0;
        self.control = None;
        self.offset = 0;
        self.user_ctl.clear();
        self.user_ctl_pending = false;
    }
}

async fn transmit<T: AsyncRead + AsyncWrite + Unpin>(
    channel: &mut WebSocketChannel<T>,
    control: &ControlFrame,
    user_ctl: Option<&[u8]>,
    parts: &[Bytes],
) -> Result<()> {
    channel.send(OpCode::Text, &control.encode(), true).await?;
    if let Some(block) = user_ctl.filter(|b| !b.is_empty()) {
        channel.send(OpCode::Text, block, true).await?;
    }
    let opcode = control.format.opcode();
    for (sent, part) in parts.iter().enumerate() {
        if let Err(err) = channel.send(opcode, part, true).await {
            return Err(Error::PartialSend {
                sent,
                total: parts.len(),
                reason: err.to_string(),
            });
        }
    }
    Ok(())
}

impl<T: AsyncRead + AsyncWrite + Unpin> CsapSession<T> {
    /// Write the queued parts as one CSAP message.
    ///
    /// Queued parts are released whether or not the write succeeds.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` if no channel is bound
    /// - the transport error if the control frame or user-control block
    ///   could not be written
    /// - `Error::PartialSend` if a fragment failed after others went out
    pub async fn send(&mut self, user_ctl: Option<&[u8]>, format: Format, fin: bool) -> Result<()> {
        let parts = std::mem::take(&mut self.parts);
        let control = ControlFrame {
            user_ctl_size: user_ctl.map_or(0, <[u8]>::len),
            data_size: self.out_total,
            num_fragments: parts.len(),
            max_fragment_size: self.out_max,
            format,
            fin,
        };
        self.out_total = 0;
        self.out_max = 0;

        let channel = bound(&mut self.channel)?;
        let result = transmit(channel, &control, user_ctl, &parts).await;
        match &result {
            Ok(()) => debug!(
                fragments = control.num_fragments,
                size = control.data_size,
                "message sent"
            ),
            Err(err) => warn!(error = %err, sid = %self.session_id, "send failed"),
        }
        result
    }

    /// Read fragments of the current message until none are left.
    async fn drain(&mut self) -> Result<()> {
        let Some(control) = self.control else {
            return Ok(());
        };
        let channel = bound(&mut self.channel)?;
        if self.user_ctl_pending {
            match channel.receive(self.timeout).await {
                Err(err) if !frame_consumed(&err) => return Err(err),
                _ => self.user_ctl_pending = false,
            }
        }
        while self.offset < control.num_fragments {
            match channel.receive(self.timeout).await {
                Err(err) if !frame_consumed(&err) => return Err(err),
                _ => self.offset += 1,
            }
        }
        if control.num_fragments > 0 {
            debug!(fragments = control.num_fragments, "drained unread fragments");
        }
        self.control = None;
        self.offset = 0;
        Ok(())
    }

    /// Read the control frame and user-control block of the next message.
    ///
    /// Unread fragments of the previous message are drained first.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidControlFrame` if the first frame is not a control frame
    /// - `Error::UserCtl` if the user-control frame does not match the
    ///   declared size
    /// - transport and timeout errors from the channel
    pub async fn receive(&mut self) -> Result<ControlFrame> {
        self.drain().await?;
        self.user_ctl.clear();

        let channel = bound(&mut self.channel)?;
        let info = channel.receive(self.timeout).await?;
        if info.size != CONTROL_FRAME_LEN || !info.fin {
            return Err(Error::InvalidControlFrame(format!(
                "control frame of {} bytes, fin {}",
                info.size, info.fin
            )));
        }
        let control = ControlFrame::decode(channel.data())?;
        self.control = Some(control);
        self.offset = 0;

        if control.user_ctl_size > 0 {
            self.user_ctl_pending = true;
            let info = match channel.receive(self.timeout).await {
                Err(err) if !frame_consumed(&err) => return Err(err),
                received => {
                    self.user_ctl_pending = false;
                    received?
                }
            };
            if info.size != control.user_ctl_size {
                return Err(Error::UserCtl {
                    expected: control.user_ctl_size,
                    actual: info.size,
                });
            }
            self.user_ctl.extend_from_slice(channel.data());
        }
        debug!(
            fragments = control.num_fragments,
            size = control.data_size,
            user_ctl = control.user_ctl_size,
            "message header received"
        );
        Ok(control)
    }

    /// Receive the next fragment and borrow it in place.
    ///
    /// The slice lives in the channel's receive buffer and is invalidated
    /// by the next call that reads from the channel.
    ///
    /// # Errors
    ///
    /// - `Error::Overflow` when every declared fragment has been consumed
    /// - `Error::InvalidUtf8` or `Error::Transcode` if a text fragment does
    ///   not transcode; the fragment still counts as consumed
    pub async fn get_data_ref(&mut self) -> Result<&[u8]> {
        let declared = self.control.map_or(0, |c| c.num_fragments);
        if self.offset >= declared {
            return Err(Error::Overflow {
                size: self.offset + 1,
                max: declared,
            });
        }
        let channel = bound(&mut self.channel)?;
        match channel.receive(self.timeout).await {
            Err(err) if !frame_consumed(&err) => return Err(err),
            received => {
                self.offset += 1;
                received?;
            }
        }
        Ok(channel.data())
    }

    /// Receive the next fragment into `buf`, returning its size.
    ///
    /// The fragment is consumed even when it does not fit.
    ///
    /// # Errors
    ///
    /// `Error::Overflow` past the declared fragment count or when `buf` is
    /// smaller than the fragment.
    pub async fn get(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.get_data_ref().await?;
        if data.len() > buf.len() {
            return Err(Error::Overflow {
                size: data.len(),
                max: buf.len(),
            });
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Drain unread fragments, then reset both directions.
    ///
    /// # Errors
    ///
    /// The error that interrupted draining. State is reset regardless.
    pub async fn clear(&mut self) -> Result<()> {
        let drained = if self.channel.is_some() {
            self.drain().await
        } else {
            Ok(())
        };
        self.reset();
        drained
    }

    /// Close the bound channel. The session keeps it for inspection.
    pub async fn close_channel(&mut self) -> Result<()> {
        self.reset();
        match self.channel.as_mut() {
            Some(channel) => channel.close(None).await,
            None => Ok(()),
        }
    }

    /// Close the channel, drop the transport and forget the session id.
    pub async fn close_service(&mut self) -> Result<()> {
        let result = self.close_channel().await;
        if self.channel.take().is_some() {
            info!(sid = %self.session_id, "service closed");
        }
        self.session_id = NULL_SESSION_ID.to_string();
        result
    }

    /// Run the open-handshake on an upgraded client channel.
    ///
    /// On success the channel is bound with the issued session id.
    ///
    /// # Errors
    ///
    /// `Error::HandshakeRefused` carrying the broker's status and reason,
    /// or `803` when the request could not be sent, `802` when no reply
    /// arrived and `850` when the reply did not parse. `Error::Config` if
    /// the target cannot be encoded in its format.
    pub async fn open_service_on(
        &mut self,
        mut channel: WebSocketChannel<T>,
        target: &ServiceTarget,
    ) -> Result<()> {
        let wire = target.request()?.encode(target.format)?;

        if let Err(err) = channel.send(OpCode::Text, &wire, true).await {
            warn!(error = %err, service = %target.service, "open request not sent");
            return Err(refused(HandshakeCode::SEND_FAILED));
        }
        if let Err(err) = channel.receive_all(self.timeout).await {
            warn!(error = %err, service = %target.service, "no open reply");
            return Err(refused(HandshakeCode::RECEIVE_FAILED));
        }
        let reply = match HandshakeReply::decode(channel.data(), target.format) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, service = %target.service, "malformed open reply");
                if let Err(err) = channel.close(None).await {
                    debug!(error = %err, "close after malformed reply failed");
                }
                return Err(refused(HandshakeCode::PROTOCOL_FAILURE));
            }
        };
        if !reply.is_success() {
            warn!(status = %reply.status, reason = %reply.reason, service = %target.service, "service refused");
            if let Err(err) = channel.close(None).await {
                debug!(error = %err, "close after refusal failed");
            }
            return Err(Error::HandshakeRefused {
                status: reply.status,
                reason: reply.reason,
            });
        }

        info!(service = %target.service, sid = %reply.sid, "service opened");
        self.open_channel(channel, reply.sid);
        Ok(())
    }
}

impl CsapSession<TcpStream> {
    /// Connect to the target, upgrade and run the open-handshake.
    ///
    /// # Errors
    ///
    /// `Error::HandshakeRefused` with status `804` if the connection or the
    /// upgrade failed, otherwise as [`open_service_on`](Self::open_service_on).
    pub async fn open_service(&mut self, target: &ServiceTarget) -> Result<()> {
        let channel =
            match WebSocketChannel::connect(self.config.clone(), &target.host, target.port).await {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(error = %err, host = %target.host, port = target.port, "connect failed");
                    return Err(refused(HandshakeCode::CONNECT_FAILED));
                }
            };
        let channel = match &self.transcoder {
            Some(t) => channel.with_transcoder(Arc::clone(t)),
            None => channel,
        };
        self.open_service_on(channel, target).await
    }
}
