//! Long-value transfer (§4.C): reading values longer than one PDU can carry, and writing
//! them back reliably through the prepare/execute queue.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::att::{AttErrorCode, AttReq, AttRsp};
use crate::connection::{is_invalid_offset, AttConnection};
use crate::{BleHostError, Error};

/// Bytes of ATT PDU overhead ahead of the attribute value in a `PREPARE_WRITE_REQ`:
/// opcode (1) + handle (2) + offset (2).
const PREPARE_WRITE_HEADER_LEN: usize = 5;

/// Reads the full value of `handle`, following up any short `READ_RSP` with `READ_BLOB_REQ`
/// continuations until the value is exhausted (§4.C, §7 "Long reads").
///
/// Terminates successfully either when a response shorter than `ATT_MTU - 1` arrives, or
/// when the server answers `INVALID_OFFSET` after at least one byte has already been
/// accumulated — both signal "no more data" per Core Spec Vol 3 Part F §3.4.4.5.
pub async fn read_long<R, W, M, const N: usize, const MAX: usize>(
    conn: &AttConnection<R, W, M, N>,
    handle: u16,
) -> Result<Vec<u8, MAX>, BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let mut accumulated: Vec<u8, MAX> = Vec::new();

    let mtu = conn.get_mtu();
    let first = conn.send_request_and_await_response(AttReq::Read { handle }).await?;
    let data = match first.as_response().map_err(BleHostError::from)? {
        AttRsp::Read { data } => data,
        AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
        _ => return Err(Error::InvalidResponse.into()),
    };
    let short = data.len() < (mtu as usize).saturating_sub(1);
    accumulated.extend_from_slice(data).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
    if short || data.is_empty() {
        return Ok(accumulated);
    }

    loop {
        let offset = accumulated.len() as u16;
        let mtu = conn.get_mtu();
        let rsp = conn.send_request_and_await_response(AttReq::ReadBlob { handle, offset }).await?;
        match rsp.as_response().map_err(BleHostError::from)? {
            AttRsp::ReadBlob { data } => {
                let short = data.len() < (mtu as usize).saturating_sub(1);
                if data.is_empty() {
                    return Ok(accumulated);
                }
                accumulated.extend_from_slice(data).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                if short {
                    return Ok(accumulated);
                }
            }
            AttRsp::Error { code, .. } => {
                if is_invalid_offset(code) && !accumulated.is_empty() {
                    return Ok(accumulated);
                }
                return Err(Error::Att(code).into());
            }
            _ => return Err(Error::InvalidResponse.into()),
        }
    }
}

/// Guards against a second long write starting while one is already in progress on this
/// connection (§4.C, "long-write mutual exclusivity").
pub struct LongWriteGuard<M: RawMutex> {
    in_progress: BlockingMutex<M, Cell<bool>>,
}

impl<M: RawMutex> LongWriteGuard<M> {
    pub fn new() -> Self {
        Self { in_progress: BlockingMutex::new(Cell::new(false)) }
    }

    fn try_acquire(&self) -> Result<(), Error> {
        self.in_progress.lock(|c| {
            if c.get() {
                Err(Error::InLongWrite)
            } else {
                c.set(true);
                Ok(())
            }
        })
    }

    fn release(&self) {
        self.in_progress.lock(|c| c.set(false));
    }
}

impl<M: RawMutex> Default for LongWriteGuard<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes `data` to `handle` through the prepare/execute queue (§4.C, "Long writes"),
/// chunked to fit the current MTU. When `reliable` is set, every `PREPARE_WRITE_RSP` echo
/// is checked against what was sent; a mismatch aborts the queue with `EXECUTE_WRITE_REQ`
/// (cancel) on a best-effort basis before surfacing the error.
pub async fn write_long<R, W, M, const N: usize>(
    conn: &AttConnection<R, W, M, N>,
    guard: &LongWriteGuard<M>,
    handle: u16,
    data: &[u8],
    reliable: bool,
) -> Result<(), BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    guard.try_acquire().map_err(BleHostError::from)?;

    let result = write_long_inner(conn, handle, data, reliable).await;
    if result.is_err() {
        // Best effort: tell the server to discard whatever we already queued. A failure
        // here does not change the error we report to the caller.
        let _ = conn.send_request_and_await_response(AttReq::ExecuteWrite { flags: crate::att::EXECUTE_WRITE_CANCEL }).await;
    }
    guard.release();
    result
}

async fn write_long_inner<R, W, M, const N: usize>(
    conn: &AttConnection<R, W, M, N>,
    handle: u16,
    data: &[u8],
    reliable: bool,
) -> Result<(), BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let mut offset: u16 = 0;

    while (offset as usize) < data.len() {
        let mtu = conn.get_mtu() as usize;
        let chunk_len = mtu.saturating_sub(PREPARE_WRITE_HEADER_LEN).min(data.len() - offset as usize).max(1);
        let chunk = &data[offset as usize..offset as usize + chunk_len];

        let rsp = conn.send_request_and_await_response(AttReq::PrepareWrite { handle, offset, data: chunk }).await?;
        let decoded = rsp.as_response().map_err(BleHostError::from)?;
        if reliable {
            verify_prepare_echo(decoded, handle, offset, chunk)?;
        } else {
            match decoded {
                AttRsp::PrepareWrite { .. } => {}
                AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
                _ => return Err(Error::InvalidResponse.into()),
            }
        }

        offset += chunk_len as u16;
    }

    let rsp = conn.send_request_and_await_response(AttReq::ExecuteWrite { flags: crate::att::EXECUTE_WRITE_WRITE }).await?;
    match rsp.as_response().map_err(BleHostError::from)? {
        AttRsp::ExecuteWrite => Ok(()),
        AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
        _ => Err(Error::InvalidResponse.into()),
    }
}

fn verify_prepare_echo(rsp: AttRsp<'_>, handle: u16, offset: u16, chunk: &[u8]) -> Result<(), Error> {
    match rsp {
        AttRsp::PrepareWrite { handle: echoed_handle, offset: echoed_offset, data: echoed_data } => {
            if echoed_handle == handle && echoed_offset == offset && echoed_data == chunk {
                Ok(())
            } else {
                Err(Error::InvalidResponse)
            }
        }
        AttRsp::Error { code, .. } => Err(Error::Att(code)),
        _ => Err(Error::InvalidResponse),
    }
}

/// Returns `true` if `code` indicates the server's prepared-write queue is already full,
/// a condition the caller may choose to retry after draining (out of scope here; surfaced
/// as a plain [`Error::Att`] to the façade, §4.C "Non-goals").
pub fn is_prepare_queue_full(code: AttErrorCode) -> bool {
    matches!(code, AttErrorCode::PrepareQueueFull)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_echo_matches_sent_chunk() {
        let rsp = AttRsp::PrepareWrite { handle: 0x10, offset: 4, data: &[1, 2, 3] };
        assert!(verify_prepare_echo(rsp, 0x10, 4, &[1, 2, 3]).is_ok());
    }

    #[test]
    fn prepare_echo_mismatch_is_invalid_response() {
        let rsp = AttRsp::PrepareWrite { handle: 0x10, offset: 4, data: &[9, 9, 9] };
        assert_eq!(verify_prepare_echo(rsp, 0x10, 4, &[1, 2, 3]), Err(Error::InvalidResponse));
    }
}
