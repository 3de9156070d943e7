//! The ATT connection multiplexer (§4.B): pairs outgoing requests with incoming responses,
//! serializes the single in-flight request ATT allows, routes server-initiated PDUs to a
//! sink, and negotiates the per-link MTU.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::att::{self, AttErrorCode, AttReq, AttRsp, ServerInitiatedPdu};
use crate::config;
use crate::{BleHostError, Error};

/// L2CAP CID for the Attribute Protocol fixed channel, Core Spec Vol 3 Part A §2.1.
const ATT_CID: u16 = 0x0004;

/// The minimal L2CAP framing this crate applies on top of the raw byte-stream socket, so
/// the reader can reassemble PDUs on length boundaries instead of assuming `read()` calls
/// align with PDU boundaries (§6).
struct L2capHeader {
    length: u16,
    channel: u16,
}

impl L2capHeader {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8; 4]) {
        buf[0..2].copy_from_slice(&self.length.to_le_bytes());
        buf[2..4].copy_from_slice(&self.channel.to_le_bytes());
    }

    fn decode(buf: &[u8; 4]) -> Self {
        Self {
            length: u16::from_le_bytes([buf[0], buf[1]]),
            channel: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}

/// An ATT PDU captured off the wire, owned so it can cross the boundary between the
/// reader loop and an awaiting caller.
pub struct OwnedPdu<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> OwnedPdu<N> {
    fn from_slice(data: &[u8]) -> Result<Self, Error> {
        let mut buf = Vec::new();
        buf.extend_from_slice(data).map_err(|_| Error::InsufficientSpace)?;
        Ok(Self { buf })
    }

    /// Decodes this PDU as a response/error PDU.
    pub fn as_response(&self) -> Result<AttRsp<'_>, Error> {
        AttRsp::decode(&self.buf)
    }

    /// The raw bytes, opcode included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// An event posted by the reader loop for a server-initiated push. The confirmation for an
/// indication has already been sent by the time this event is posted (§4.B, §4.F), so a
/// slow or failing consumer of this event can never delay the wire-level handshake.
pub enum ServerEvent<const N: usize> {
    Notification { handle: u16, data: Vec<u8, N> },
    Indication { handle: u16, data: Vec<u8, N> },
}

/// `{ opcode, expected_response_opcode }` of the currently in-flight request (§3, "Pending
/// request slot"). The completion sink itself is `AttConnection::response_channel`, shared
/// since at most one request is ever in flight.
#[derive(Clone, Copy)]
struct PendingRequest {
    request_opcode: u8,
    expected_response_opcode: u8,
}

/// `{ negotiated, exchanged }` (§3, "MTU state").
#[derive(Clone, Copy)]
struct MtuState {
    negotiated: u16,
    exchanged: bool,
}

/// Admission-controls callers waiting for the single in-flight slot, capped at
/// `GATT_CLIENT_PENDING_REQUESTS` (§2a). Releases its slot on drop, so a caller whose
/// future is cancelled while still queued (never having reached the slot) does not leak
/// admission capacity.
struct QueuedRequestSlot<'a, M: RawMutex> {
    counter: &'a BlockingMutex<M, Cell<usize>>,
}

impl<'a, M: RawMutex> QueuedRequestSlot<'a, M> {
    fn acquire(counter: &'a BlockingMutex<M, Cell<usize>>) -> Result<Self, Error> {
        counter.lock(|c| {
            if c.get() >= config::GATT_CLIENT_PENDING_REQUESTS {
                Err(Error::InsufficientSpace)
            } else {
                c.set(c.get() + 1);
                Ok(())
            }
        })?;
        Ok(Self { counter })
    }
}

impl<'a, M: RawMutex> Drop for QueuedRequestSlot<'a, M> {
    fn drop(&mut self) {
        self.counter.lock(|c| c.set(c.get() - 1));
    }
}

/// The ATT connection multiplexer.
///
/// Generic over the reader half `R` and writer half `W` of the underlying socket (so they
/// can be driven concurrently, per §4.B/§5), a `RawMutex` implementation `M`, and the
/// maximum PDU size `N` this connection will ever encode or buffer.
pub struct AttConnection<R, W, M, const N: usize = 251>
where
    R: Read,
    W: Write,
    M: RawMutex,
{
    reader: AsyncMutex<M, R>,
    writer: AsyncMutex<M, W>,
    /// Depth-1 permit: holding it is equivalent to owning the single in-flight slot.
    request_slot: AsyncMutex<M, ()>,
    /// Admission count of callers currently queued for `request_slot`, capped at
    /// `GATT_CLIENT_PENDING_REQUESTS` (§2a config ladder) so a slow peer cannot leave an
    /// unbounded number of tasks parked on the mutex.
    queued_requests: BlockingMutex<M, Cell<usize>>,
    pending: BlockingMutex<M, Cell<Option<PendingRequest>>>,
    response_channel: Channel<M, Result<OwnedPdu<N>, Error>, 1>,
    mtu: BlockingMutex<M, Cell<MtuState>>,
    server_events: Channel<M, ServerEvent<N>, { config::GATT_CLIENT_NOTIFICATION_QUEUE_SIZE }>,
    failed: BlockingMutex<M, Cell<bool>>,
}

impl<R, W, M, const N: usize> AttConnection<R, W, M, N>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    /// Creates a new multiplexer over an already-connected L2CAP fixed channel.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            request_slot: AsyncMutex::new(()),
            queued_requests: BlockingMutex::new(Cell::new(0)),
            pending: BlockingMutex::new(Cell::new(None)),
            response_channel: Channel::new(),
            mtu: BlockingMutex::new(Cell::new(MtuState { negotiated: config::ATT_DEFAULT_MTU, exchanged: false })),
            server_events: Channel::new(),
            failed: BlockingMutex::new(Cell::new(false)),
        }
    }

    /// The current negotiated MTU. Read fresh on every size-dependent decision (§4.B); never
    /// cached by a caller across suspension points.
    pub fn get_mtu(&self) -> u16 {
        self.mtu.lock(|c| c.get().negotiated)
    }

    fn mark_failed(&self) {
        self.failed.lock(|c| c.set(true));
    }

    fn is_failed(&self) -> bool {
        self.failed.lock(|c| c.get())
    }

    async fn write_framed(&self, payload: &[u8]) -> Result<(), BleHostError<W::Error>> {
        let mut header_buf = [0u8; L2capHeader::SIZE];
        L2capHeader { length: payload.len() as u16, channel: ATT_CID }.encode(&mut header_buf);

        let mut writer = self.writer.lock().await;
        writer.write_all(&header_buf).await.map_err(BleHostError::Transport)?;
        writer.write_all(payload).await.map_err(BleHostError::Transport)?;
        Ok(())
    }

    /// Sends a request and awaits its matching response, per the single-in-flight
    /// discipline (§4.B). Not for `ATT_WRITE_CMD` or `ATT_HANDLE_VALUE_CONFIRMATION` — use
    /// [`AttConnection::send_command`] for those.
    pub async fn send_request_and_await_response(
        &self,
        req: AttReq<'_>,
    ) -> Result<OwnedPdu<N>, BleHostError<W::Error>> {
        assert!(!req.is_command(), "commands must go through send_command");
        let expected_response_opcode = req
            .expected_response_opcode()
            .expect("non-command requests always expect a response");

        if self.is_failed() {
            return Err(Error::InvalidResponse.into());
        }

        let admission = QueuedRequestSlot::acquire(&self.queued_requests).map_err(BleHostError::from)?;

        // Hold the depth-1 slot for the entire round trip: this is what makes discovery
        // walks and long-value rounds atomic with respect to other callers (§5).
        let _permit = self.request_slot.lock().await;
        drop(admission);

        let mut buf = [0u8; N];
        let encoded_len = req.encode(&mut buf).map_err(BleHostError::from)?;

        // Register the pending-request record *before* writing the bytes, so a response
        // that arrives immediately after the write cannot race ahead of the reader loop's
        // knowledge of what it is waiting for (§9, resolved open question).
        self.pending.lock(|c| {
            c.set(Some(PendingRequest { request_opcode: req.opcode(), expected_response_opcode }))
        });

        if let Err(e) = self.write_framed(&buf[..encoded_len]).await {
            self.pending.lock(|c| c.set(None));
            self.mark_failed();
            return Err(e);
        }

        let result = with_timeout(Duration::from_secs(config::ATT_RESPONSE_TIMEOUT_SECS), self.response_channel.receive())
            .await
            .map_err(|_| {
                self.mark_failed();
                BleHostError::Protocol(Error::InvalidResponse)
            })?;

        result.map_err(BleHostError::from)
    }

    /// Sends an `ATT_WRITE_CMD` or `ATT_HANDLE_VALUE_CONFIRMATION`: bypasses the in-flight
    /// slot entirely (§4.B), but still serializes its bytes against any other writer via
    /// the writer-side lock.
    pub async fn send_command(&self, cmd: AttReq<'_>) -> Result<(), BleHostError<W::Error>> {
        let mut buf = [0u8; N];
        let encoded_len = cmd.encode(&mut buf).map_err(BleHostError::from)?;
        self.write_framed(&buf[..encoded_len]).await
    }

    /// Negotiates the MTU once. A no-op returning the already-negotiated value if an
    /// exchange already completed (§3, "MTU state" is monotonic).
    pub async fn exchange_mtu(&self, preferred: u16) -> Result<u16, BleHostError<W::Error>> {
        if self.mtu.lock(|c| c.get().exchanged) {
            return Ok(self.get_mtu());
        }

        let pdu = self.send_request_and_await_response(AttReq::ExchangeMtu { mtu: preferred }).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::ExchangeMtu { mtu: server_mtu } => {
                let negotiated = preferred.min(server_mtu).max(config::ATT_DEFAULT_MTU);
                self.mtu.lock(|c| c.set(MtuState { negotiated, exchanged: true }));
                Ok(negotiated)
            }
            AttRsp::Error { code, .. } => Err(BleHostError::Protocol(Error::Att(code))),
            _ => Err(BleHostError::Protocol(Error::InvalidResponse)),
        }
    }

    /// Receives the next server-initiated notification or indication. Indications have
    /// already been confirmed on the wire by the time this returns (§4.B, §4.F, invariant
    /// 5 of §8).
    pub async fn next_server_event(&self) -> ServerEvent<N> {
        self.server_events.receive().await
    }

    /// Drives the reader half: parses inbound L2CAP-framed PDUs and dispatches them. Must
    /// be polled continuously for the connection to make progress; typically spawned as a
    /// background task alongside the GATT façade.
    pub async fn run(&self) -> Result<(), BleHostError<R::Error>> {
        loop {
            if let Err(e) = self.run_once().await {
                self.mark_failed();
                self.drain_pending_with_failure();
                return Err(e);
            }
        }
    }

    fn drain_pending_with_failure(&self) {
        if self.pending.lock(|c| c.take()).is_some() {
            // Best effort: if a caller is awaiting response_channel, unblock it with a
            // transport failure rather than hanging forever. The channel has depth 1, so a
            // non-blocking try_send is correct here; if it's already full the awaiting
            // caller will observe the timeout path instead.
            let _ = self.response_channel.try_send(Err(Error::InvalidResponse));
        }
    }

    async fn run_once(&self) -> Result<(), BleHostError<R::Error>> {
        let mut header_buf = [0u8; L2capHeader::SIZE];
        {
            let mut reader = self.reader.lock().await;
            reader.read_exact(&mut header_buf).await.map_err(read_exact_err)?;
        }
        let header = L2capHeader::decode(&header_buf);
        if header.channel != ATT_CID {
            // Traffic for some other fixed channel reached this connection; out of scope
            // (§1) for anything but ATT, so it is dropped rather than routed.
            let mut scratch = [0u8; 64];
            let mut remaining = header.length as usize;
            let mut reader = self.reader.lock().await;
            while remaining > 0 {
                let n = remaining.min(scratch.len());
                reader.read_exact(&mut scratch[..n]).await.map_err(read_exact_err)?;
                remaining -= n;
            }
            return Ok(());
        }

        let mut pdu_buf = [0u8; N];
        let len = header.length as usize;
        if len > pdu_buf.len() {
            return Err(BleHostError::Protocol(Error::InvalidPdu));
        }
        {
            let mut reader = self.reader.lock().await;
            reader.read_exact(&mut pdu_buf[..len]).await.map_err(read_exact_err)?;
        }
        let pdu = &pdu_buf[..len];

        if let Some(server_pdu) = ServerInitiatedPdu::decode(pdu) {
            self.handle_server_initiated(server_pdu).await?;
            return Ok(());
        }

        self.handle_response(pdu).await;
        Ok(())
    }

    async fn handle_server_initiated(
        &self,
        decoded: Result<ServerInitiatedPdu<'_>, Error>,
    ) -> Result<(), BleHostError<R::Error>> {
        match decoded {
            Ok(ServerInitiatedPdu::Notification { handle, data }) => {
                if let Ok(owned) = Vec::from_slice(data) {
                    let _ = self.server_events.try_send(ServerEvent::Notification { handle, data: owned });
                }
            }
            Ok(ServerInitiatedPdu::Indication { handle, data }) => {
                let owned = Vec::from_slice(data).ok();
                // The confirmation MUST be sent before this handler returns, regardless of
                // whether a subscriber exists or the event queue has room (§4.B, §8 #5).
                self.send_command(AttReq::HandleValueConfirmation).await?;
                if let Some(owned) = owned {
                    let _ = self.server_events.try_send(ServerEvent::Indication { handle, data: owned });
                }
            }
            Err(_) => {
                // Malformed server-initiated PDU: not fatal to the link on its own, but we
                // cannot act on it.
            }
        }
        Ok(())
    }

    async fn handle_response(&self, pdu: &[u8]) {
        let opcode = pdu[0];
        let pending = self.pending.lock(|c| c.get());

        let Some(pending) = pending else {
            // No request is in flight: an unsolicited response/error is a protocol
            // violation under ATT's strict request/response discipline.
            let _ = self.response_channel.try_send(Err(Error::InvalidResponse));
            return;
        };

        let matches_response = opcode == pending.expected_response_opcode;
        let matches_error = opcode == att::ERROR_RESPONSE
            && AttRsp::decode(pdu).ok().and_then(|rsp| match rsp {
                AttRsp::Error { request_opcode, .. } => Some(request_opcode == pending.request_opcode),
                _ => None,
            }) == Some(true);

        if !matches_response && !matches_error {
            self.pending.lock(|c| c.set(None));
            self.mark_failed();
            let _ = self.response_channel.try_send(Err(Error::InvalidResponse));
            return;
        }

        self.pending.lock(|c| c.set(None));
        let result: Result<OwnedPdu<N>, Error> = OwnedPdu::from_slice(pdu);
        let _ = self.response_channel.try_send(result);
    }
}

fn read_exact_err<E>(e: embedded_io_async::ReadExactError<E>) -> BleHostError<E> {
    match e {
        embedded_io_async::ReadExactError::UnexpectedEof => BleHostError::Protocol(Error::InvalidPdu),
        embedded_io_async::ReadExactError::Other(e) => BleHostError::Transport(e),
    }
}

/// The error code carried by an `AttErrorCode` that corresponds to an attribute-not-found
/// condition: recovered locally by discovery walks (§7).
pub fn is_attribute_not_found(code: AttErrorCode) -> bool {
    matches!(code, AttErrorCode::AttributeNotFound)
}

/// `true` if the error code corresponds to an invalid-offset condition, recovered locally
/// by the read-blob loop when the accumulator is non-empty (§7).
pub fn is_invalid_offset(code: AttErrorCode) -> bool {
    matches!(code, AttErrorCode::InvalidOffset)
}
