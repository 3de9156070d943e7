//! Attribute Protocol (ATT) PDU codecs — Bluetooth Core Spec Vol 3 Part F §3.4.
//!
//! Every PDU here is bijective with a byte slice: [`AttReq::encode`]/[`AttRsp::decode`] and
//! their counterparts round-trip. All multi-byte fields are little-endian. Decoding never
//! panics; malformed input produces [`Error::InvalidPdu`].

use heapless::Vec;

use crate::cursor::{ReadCursor, WriteCursor};
use crate::uuid::BluetoothUuid;
use crate::Error;

pub const ERROR_RESPONSE: u8 = 0x01;
pub const EXCHANGE_MTU_REQ: u8 = 0x02;
pub const EXCHANGE_MTU_RSP: u8 = 0x03;
pub const FIND_INFORMATION_REQ: u8 = 0x04;
pub const FIND_INFORMATION_RSP: u8 = 0x05;
pub const FIND_BY_TYPE_VALUE_REQ: u8 = 0x06;
pub const FIND_BY_TYPE_VALUE_RSP: u8 = 0x07;
pub const READ_BY_TYPE_REQ: u8 = 0x08;
pub const READ_BY_TYPE_RSP: u8 = 0x09;
pub const READ_REQ: u8 = 0x0A;
pub const READ_RSP: u8 = 0x0B;
pub const READ_BLOB_REQ: u8 = 0x0C;
pub const READ_BLOB_RSP: u8 = 0x0D;
pub const READ_MULTIPLE_REQ: u8 = 0x0E;
pub const READ_MULTIPLE_RSP: u8 = 0x0F;
pub const READ_BY_GROUP_TYPE_REQ: u8 = 0x10;
pub const READ_BY_GROUP_TYPE_RSP: u8 = 0x11;
pub const WRITE_REQ: u8 = 0x12;
pub const WRITE_RSP: u8 = 0x13;
pub const PREPARE_WRITE_REQ: u8 = 0x16;
pub const PREPARE_WRITE_RSP: u8 = 0x17;
pub const EXECUTE_WRITE_REQ: u8 = 0x18;
pub const EXECUTE_WRITE_RSP: u8 = 0x19;
pub const HANDLE_VALUE_NOTIFICATION: u8 = 0x1B;
pub const HANDLE_VALUE_INDICATION: u8 = 0x1D;
pub const HANDLE_VALUE_CONFIRMATION: u8 = 0x1E;
pub const WRITE_CMD: u8 = 0x52;

/// `EXECUTE_WRITE_REQ` flag value that cancels the pending prepared-write queue.
pub const EXECUTE_WRITE_CANCEL: u8 = 0x00;
/// `EXECUTE_WRITE_REQ` flag value that commits the pending prepared-write queue.
pub const EXECUTE_WRITE_WRITE: u8 = 0x01;

/// A maximum of 16 handles per `READ_MULTIPLE_REQ` comfortably covers real-world use and
/// keeps the request on the stack.
pub const MAX_READ_MULTIPLE_HANDLES: usize = 16;

/// ATT error codes, Core Spec Vol 3 Part F §3.4.1.1, Table 3.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// An error code this crate does not assign a dedicated variant to (application-specific
    /// or reserved-for-future-use codes both land here, carrying the raw byte).
    Other(u8),
}

impl AttErrorCode {
    fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::InvalidHandle,
            0x02 => Self::ReadNotPermitted,
            0x03 => Self::WriteNotPermitted,
            0x04 => Self::InvalidPdu,
            0x05 => Self::InsufficientAuthentication,
            0x06 => Self::RequestNotSupported,
            0x07 => Self::InvalidOffset,
            0x08 => Self::InsufficientAuthorization,
            0x09 => Self::PrepareQueueFull,
            0x0A => Self::AttributeNotFound,
            0x0B => Self::AttributeNotLong,
            0x0C => Self::InsufficientEncryptionKeySize,
            0x0D => Self::InvalidAttributeValueLength,
            0x0E => Self::UnlikelyError,
            0x0F => Self::InsufficientEncryption,
            0x10 => Self::UnsupportedGroupType,
            0x11 => Self::InsufficientResources,
            other => Self::Other(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::InvalidHandle => 0x01,
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::InvalidPdu => 0x04,
            Self::InsufficientAuthentication => 0x05,
            Self::RequestNotSupported => 0x06,
            Self::InvalidOffset => 0x07,
            Self::InsufficientAuthorization => 0x08,
            Self::PrepareQueueFull => 0x09,
            Self::AttributeNotFound => 0x0A,
            Self::AttributeNotLong => 0x0B,
            Self::InsufficientEncryptionKeySize => 0x0C,
            Self::InvalidAttributeValueLength => 0x0D,
            Self::UnlikelyError => 0x0E,
            Self::InsufficientEncryption => 0x0F,
            Self::UnsupportedGroupType => 0x10,
            Self::InsufficientResources => 0x11,
            Self::Other(b) => b,
        }
    }
}

/// Client-to-server PDUs: requests and commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttReq<'d> {
    ExchangeMtu { mtu: u16 },
    FindInformation { start: u16, end: u16 },
    FindByTypeValue { start: u16, end: u16, att_type: u16, att_value: &'d [u8] },
    ReadByType { start: u16, end: u16, attribute_type: BluetoothUuid },
    Read { handle: u16 },
    ReadBlob { handle: u16, offset: u16 },
    ReadMultiple { handles: &'d [u16] },
    ReadByGroupType { start: u16, end: u16, group_type: u16 },
    Write { handle: u16, data: &'d [u8] },
    WriteCommand { handle: u16, data: &'d [u8] },
    PrepareWrite { handle: u16, offset: u16, data: &'d [u8] },
    ExecuteWrite { flags: u8 },
    HandleValueConfirmation,
}

impl<'d> AttReq<'d> {
    /// The opcode byte this request/command will be encoded with.
    pub fn opcode(&self) -> u8 {
        match self {
            AttReq::ExchangeMtu { .. } => EXCHANGE_MTU_REQ,
            AttReq::FindInformation { .. } => FIND_INFORMATION_REQ,
            AttReq::FindByTypeValue { .. } => FIND_BY_TYPE_VALUE_REQ,
            AttReq::ReadByType { .. } => READ_BY_TYPE_REQ,
            AttReq::Read { .. } => READ_REQ,
            AttReq::ReadBlob { .. } => READ_BLOB_REQ,
            AttReq::ReadMultiple { .. } => READ_MULTIPLE_REQ,
            AttReq::ReadByGroupType { .. } => READ_BY_GROUP_TYPE_REQ,
            AttReq::Write { .. } => WRITE_REQ,
            AttReq::WriteCommand { .. } => WRITE_CMD,
            AttReq::PrepareWrite { .. } => PREPARE_WRITE_REQ,
            AttReq::ExecuteWrite { .. } => EXECUTE_WRITE_REQ,
            AttReq::HandleValueConfirmation => HANDLE_VALUE_CONFIRMATION,
        }
    }

    /// `true` if this is an `ATT_WRITE_CMD`: it bypasses the single-in-flight slot (§4.B).
    pub fn is_command(&self) -> bool {
        matches!(self, AttReq::WriteCommand { .. })
    }

    /// The opcode of the response this request expects, or `None` for commands and
    /// confirmations, which have no response.
    pub fn expected_response_opcode(&self) -> Option<u8> {
        match self {
            AttReq::ExchangeMtu { .. } => Some(EXCHANGE_MTU_RSP),
            AttReq::FindInformation { .. } => Some(FIND_INFORMATION_RSP),
            AttReq::FindByTypeValue { .. } => Some(FIND_BY_TYPE_VALUE_RSP),
            AttReq::ReadByType { .. } => Some(READ_BY_TYPE_RSP),
            AttReq::Read { .. } => Some(READ_RSP),
            AttReq::ReadBlob { .. } => Some(READ_BLOB_RSP),
            AttReq::ReadMultiple { .. } => Some(READ_MULTIPLE_RSP),
            AttReq::ReadByGroupType { .. } => Some(READ_BY_GROUP_TYPE_RSP),
            AttReq::Write { .. } => Some(WRITE_RSP),
            AttReq::PrepareWrite { .. } => Some(PREPARE_WRITE_RSP),
            AttReq::ExecuteWrite { .. } => Some(EXECUTE_WRITE_RSP),
            AttReq::WriteCommand { .. } | AttReq::HandleValueConfirmation => None,
        }
    }

    /// Encoded size in bytes, including the opcode.
    pub fn size(&self) -> usize {
        1 + match self {
            AttReq::ExchangeMtu { .. } => 2,
            AttReq::FindInformation { .. } => 4,
            AttReq::FindByTypeValue { att_value, .. } => 6 + att_value.len(),
            AttReq::ReadByType { attribute_type, .. } => 4 + attribute_type.as_raw().len(),
            AttReq::Read { .. } => 2,
            AttReq::ReadBlob { .. } => 4,
            AttReq::ReadMultiple { handles } => handles.len() * 2,
            AttReq::ReadByGroupType { .. } => 6,
            AttReq::Write { data, .. } => 2 + data.len(),
            AttReq::WriteCommand { data, .. } => 2 + data.len(),
            AttReq::PrepareWrite { data, .. } => 4 + data.len(),
            AttReq::ExecuteWrite { .. } => 1,
            AttReq::HandleValueConfirmation => 0,
        }
    }

    /// Encodes this PDU into `buf`, returning the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut w = WriteCursor::new(buf);
        w.write(self.opcode())?;
        match self {
            AttReq::ExchangeMtu { mtu } => w.write(*mtu)?,
            AttReq::FindInformation { start, end } => {
                w.write(*start)?;
                w.write(*end)?;
            }
            AttReq::FindByTypeValue { start, end, att_type, att_value } => {
                w.write(*start)?;
                w.write(*end)?;
                w.write(*att_type)?;
                w.append(att_value)?;
            }
            AttReq::ReadByType { start, end, attribute_type } => {
                w.write(*start)?;
                w.write(*end)?;
                w.append(attribute_type.as_raw())?;
            }
            AttReq::Read { handle } => w.write(*handle)?,
            AttReq::ReadBlob { handle, offset } => {
                w.write(*handle)?;
                w.write(*offset)?;
            }
            AttReq::ReadMultiple { handles } => {
                for h in handles.iter() {
                    w.write(*h)?;
                }
            }
            AttReq::ReadByGroupType { start, end, group_type } => {
                w.write(*start)?;
                w.write(*end)?;
                w.write(*group_type)?;
            }
            AttReq::Write { handle, data } | AttReq::WriteCommand { handle, data } => {
                w.write(*handle)?;
                w.append(data)?;
            }
            AttReq::PrepareWrite { handle, offset, data } => {
                w.write(*handle)?;
                w.write(*offset)?;
                w.append(data)?;
            }
            AttReq::ExecuteWrite { flags } => w.write(*flags)?,
            AttReq::HandleValueConfirmation => {}
        }
        Ok(w.len())
    }
}

/// Iterator over `(handle, end_group_handle, value)` tuples in a `READ_BY_GROUP_TYPE_RSP`.
pub struct ReadByGroupTypeIter<'d> {
    data: &'d [u8],
    entry_len: usize,
}

impl<'d> Iterator for ReadByGroupTypeIter<'d> {
    type Item = Result<(u16, u16, &'d [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < self.entry_len {
            self.data = &[];
            return Some(Err(Error::InvalidPdu));
        }
        let (entry, rest) = self.data.split_at(self.entry_len);
        self.data = rest;
        let mut r = ReadCursor::new(entry);
        let handle: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let end: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((handle, end, r.remaining())))
    }
}

/// Iterator over `(handle, value)` tuples in a `READ_BY_TYPE_RSP`.
pub struct ReadByTypeIter<'d> {
    data: &'d [u8],
    entry_len: usize,
}

impl<'d> Iterator for ReadByTypeIter<'d> {
    type Item = Result<(u16, &'d [u8]), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < self.entry_len {
            self.data = &[];
            return Some(Err(Error::InvalidPdu));
        }
        let (entry, rest) = self.data.split_at(self.entry_len);
        self.data = rest;
        let mut r = ReadCursor::new(entry);
        let handle: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((handle, r.remaining())))
    }
}

/// Iterator over `(found_handle, group_end_handle)` tuples in a `FIND_BY_TYPE_VALUE_RSP`.
pub struct FindByTypeValueIter<'d> {
    data: &'d [u8],
}

impl<'d> Iterator for FindByTypeValueIter<'d> {
    type Item = Result<(u16, u16), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < 4 {
            self.data = &[];
            return Some(Err(Error::InvalidPdu));
        }
        let (entry, rest) = self.data.split_at(4);
        self.data = rest;
        let mut r = ReadCursor::new(entry);
        let handle: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let end: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((handle, end)))
    }
}

/// Iterator over `(handle, uuid)` tuples in a `FIND_INFORMATION_RSP`.
pub struct FindInformationIter<'d> {
    data: &'d [u8],
    entry_len: usize,
}

impl<'d> Iterator for FindInformationIter<'d> {
    type Item = Result<(u16, BluetoothUuid), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < self.entry_len {
            self.data = &[];
            return Some(Err(Error::InvalidPdu));
        }
        let (entry, rest) = self.data.split_at(self.entry_len);
        self.data = rest;
        let mut r = ReadCursor::new(entry);
        let handle: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let uuid = match BluetoothUuid::from_slice(r.remaining()) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        Some(Ok((handle, uuid)))
    }
}

/// Server-to-client PDUs: responses and the error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttRsp<'d> {
    Error { request_opcode: u8, handle: u16, code: AttErrorCode },
    ExchangeMtu { mtu: u16 },
    FindInformation { format: u8, data: &'d [u8] },
    FindByTypeValue { data: &'d [u8] },
    ReadByType { entry_len: u8, data: &'d [u8] },
    Read { data: &'d [u8] },
    ReadBlob { data: &'d [u8] },
    ReadMultiple { data: &'d [u8] },
    ReadByGroupType { entry_len: u8, data: &'d [u8] },
    Write,
    PrepareWrite { handle: u16, offset: u16, data: &'d [u8] },
    ExecuteWrite,
}

impl<'d> AttRsp<'d> {
    /// Decodes a full PDU, opcode included.
    pub fn decode(pdu: &'d [u8]) -> Result<Self, Error> {
        if pdu.is_empty() {
            return Err(Error::InvalidPdu);
        }
        let opcode = pdu[0];
        let mut r = ReadCursor::new(&pdu[1..]);
        match opcode {
            ERROR_RESPONSE => {
                let request_opcode: u8 = r.read()?;
                let handle: u16 = r.read()?;
                let code: u8 = r.read()?;
                Ok(AttRsp::Error { request_opcode, handle, code: AttErrorCode::from_byte(code) })
            }
            EXCHANGE_MTU_RSP => Ok(AttRsp::ExchangeMtu { mtu: r.read()? }),
            FIND_INFORMATION_RSP => {
                let format: u8 = r.read()?;
                if format != 0x01 && format != 0x02 {
                    return Err(Error::InvalidPdu);
                }
                Ok(AttRsp::FindInformation { format, data: r.remaining() })
            }
            FIND_BY_TYPE_VALUE_RSP => Ok(AttRsp::FindByTypeValue { data: r.remaining() }),
            READ_BY_TYPE_RSP => {
                let entry_len: u8 = r.read()?;
                Ok(AttRsp::ReadByType { entry_len, data: r.remaining() })
            }
            READ_RSP => Ok(AttRsp::Read { data: r.remaining() }),
            READ_BLOB_RSP => Ok(AttRsp::ReadBlob { data: r.remaining() }),
            READ_MULTIPLE_RSP => Ok(AttRsp::ReadMultiple { data: r.remaining() }),
            READ_BY_GROUP_TYPE_RSP => {
                let entry_len: u8 = r.read()?;
                Ok(AttRsp::ReadByGroupType { entry_len, data: r.remaining() })
            }
            WRITE_RSP => Ok(AttRsp::Write),
            PREPARE_WRITE_RSP => {
                let handle: u16 = r.read()?;
                let offset: u16 = r.read()?;
                Ok(AttRsp::PrepareWrite { handle, offset, data: r.remaining() })
            }
            EXECUTE_WRITE_RSP => Ok(AttRsp::ExecuteWrite),
            _ => Err(Error::InvalidPdu),
        }
    }

    /// The opcode this response was (or would be) encoded with.
    pub fn opcode(&self) -> u8 {
        match self {
            AttRsp::Error { .. } => ERROR_RESPONSE,
            AttRsp::ExchangeMtu { .. } => EXCHANGE_MTU_RSP,
            AttRsp::FindInformation { .. } => FIND_INFORMATION_RSP,
            AttRsp::FindByTypeValue { .. } => FIND_BY_TYPE_VALUE_RSP,
            AttRsp::ReadByType { .. } => READ_BY_TYPE_RSP,
            AttRsp::Read { .. } => READ_RSP,
            AttRsp::ReadBlob { .. } => READ_BLOB_RSP,
            AttRsp::ReadMultiple { .. } => READ_MULTIPLE_RSP,
            AttRsp::ReadByGroupType { .. } => READ_BY_GROUP_TYPE_RSP,
            AttRsp::Write => WRITE_RSP,
            AttRsp::PrepareWrite { .. } => PREPARE_WRITE_RSP,
            AttRsp::ExecuteWrite => EXECUTE_WRITE_RSP,
        }
    }

    /// Encodes this PDU into `buf`, returning the number of bytes written. Primarily useful
    /// for tests that construct canned server responses.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut w = WriteCursor::new(buf);
        w.write(self.opcode())?;
        match self {
            AttRsp::Error { request_opcode, handle, code } => {
                w.write(*request_opcode)?;
                w.write(*handle)?;
                w.write(code.to_byte())?;
            }
            AttRsp::ExchangeMtu { mtu } => w.write(*mtu)?,
            AttRsp::FindInformation { format, data } => {
                w.write(*format)?;
                w.append(data)?;
            }
            AttRsp::FindByTypeValue { data } => w.append(data)?,
            AttRsp::ReadByType { entry_len, data } => {
                w.write(*entry_len)?;
                w.append(data)?;
            }
            AttRsp::Read { data } | AttRsp::ReadBlob { data } | AttRsp::ReadMultiple { data } => w.append(data)?,
            AttRsp::ReadByGroupType { entry_len, data } => {
                w.write(*entry_len)?;
                w.append(data)?;
            }
            AttRsp::Write | AttRsp::ExecuteWrite => {}
            AttRsp::PrepareWrite { handle, offset, data } => {
                w.write(*handle)?;
                w.write(*offset)?;
                w.append(data)?;
            }
        }
        Ok(w.len())
    }

    /// Tuple iterator for [`AttRsp::ReadByGroupType`].
    pub fn read_by_group_type_entries(entry_len: u8, data: &'d [u8]) -> ReadByGroupTypeIter<'d> {
        ReadByGroupTypeIter { data, entry_len: entry_len as usize }
    }

    /// Tuple iterator for [`AttRsp::ReadByType`].
    pub fn read_by_type_entries(entry_len: u8, data: &'d [u8]) -> ReadByTypeIter<'d> {
        ReadByTypeIter { data, entry_len: entry_len as usize }
    }

    /// Tuple iterator for [`AttRsp::FindByTypeValue`].
    pub fn find_by_type_value_entries(data: &'d [u8]) -> FindByTypeValueIter<'d> {
        FindByTypeValueIter { data }
    }

    /// Tuple iterator for [`AttRsp::FindInformation`], `format` 0x01 -> 16-bit UUIDs (entries
    /// of 4 bytes), `format` 0x02 -> 128-bit UUIDs (entries of 18 bytes).
    pub fn find_information_entries(format: u8, data: &'d [u8]) -> FindInformationIter<'d> {
        let entry_len = if format == 0x02 { 18 } else { 4 };
        FindInformationIter { data, entry_len }
    }
}

/// Server-initiated PDUs that are neither requests nor responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerInitiatedPdu<'d> {
    Notification { handle: u16, data: &'d [u8] },
    Indication { handle: u16, data: &'d [u8] },
}

impl<'d> ServerInitiatedPdu<'d> {
    /// Decodes a `HANDLE_VALUE_NOTIFICATION` or `HANDLE_VALUE_INDICATION`, opcode included.
    /// Returns `None` if `pdu`'s opcode is neither (the caller should try [`AttRsp::decode`]
    /// or treat it as an unsolicited, unknown PDU).
    pub fn decode(pdu: &'d [u8]) -> Option<Result<Self, Error>> {
        if pdu.is_empty() {
            return Some(Err(Error::InvalidPdu));
        }
        let opcode = pdu[0];
        if opcode != HANDLE_VALUE_NOTIFICATION && opcode != HANDLE_VALUE_INDICATION {
            return None;
        }
        let mut r = ReadCursor::new(&pdu[1..]);
        let handle: u16 = match r.read() {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let data = r.remaining();
        Some(Ok(if opcode == HANDLE_VALUE_NOTIFICATION {
            ServerInitiatedPdu::Notification { handle, data }
        } else {
            ServerInitiatedPdu::Indication { handle, data }
        }))
    }

    /// Encodes this PDU into `buf`. Primarily useful for tests that construct canned server
    /// pushes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let (opcode, handle, data) = match self {
            ServerInitiatedPdu::Notification { handle, data } => (HANDLE_VALUE_NOTIFICATION, *handle, *data),
            ServerInitiatedPdu::Indication { handle, data } => (HANDLE_VALUE_INDICATION, *handle, *data),
        };
        let mut w = WriteCursor::new(buf);
        w.write(opcode)?;
        w.write(handle)?;
        w.append(data)?;
        Ok(w.len())
    }
}

/// Builds the bounded handle list used by [`AttReq::ReadMultiple`].
pub fn read_multiple_handles(handles: &[u16]) -> Result<Vec<u16, MAX_READ_MULTIPLE_HANDLES>, Error> {
    let mut v = Vec::new();
    for h in handles {
        v.push(*h).map_err(|_| Error::InsufficientSpace)?;
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_req_round_trips() {
        let req = AttReq::Read { handle: 0x0025 };
        let mut buf = [0u8; 3];
        let n = req.encode(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[READ_REQ, 0x25, 0x00]);
    }

    #[test]
    fn error_response_decodes() {
        let buf = [ERROR_RESPONSE, READ_BY_GROUP_TYPE_REQ, 0x0A, 0x00, 0x0A];
        let rsp = AttRsp::decode(&buf).unwrap();
        assert_eq!(
            rsp,
            AttRsp::Error { request_opcode: READ_BY_GROUP_TYPE_REQ, handle: 0x000A, code: AttErrorCode::AttributeNotFound }
        );
    }

    #[test]
    fn read_by_group_type_rsp_iterates_tuples() {
        // length=6, one tuple: handle=0x0001, end=0x0009, uuid=0x1800
        let buf = [READ_BY_GROUP_TYPE_RSP, 6, 0x01, 0x00, 0x09, 0x00, 0x00, 0x18];
        let rsp = AttRsp::decode(&buf).unwrap();
        match rsp {
            AttRsp::ReadByGroupType { entry_len, data } => {
                let mut it = AttRsp::read_by_group_type_entries(entry_len, data);
                let (handle, end, uuid) = it.next().unwrap().unwrap();
                assert_eq!(handle, 0x0001);
                assert_eq!(end, 0x0009);
                assert_eq!(uuid, &[0x00, 0x18]);
                assert!(it.next().is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn find_information_rejects_mixed_format_as_single_format_byte() {
        // format=0x02 (128-bit), one 18-byte entry
        let mut buf = [0u8; 1 + 1 + 18];
        buf[0] = FIND_INFORMATION_RSP;
        buf[1] = 0x02;
        buf[2] = 0x01;
        let rsp = AttRsp::decode(&buf).unwrap();
        match rsp {
            AttRsp::FindInformation { format, data } => {
                assert_eq!(format, 0x02);
                let mut it = AttRsp::find_information_entries(format, data);
                let (handle, uuid) = it.next().unwrap().unwrap();
                assert_eq!(handle, 0x0001);
                assert!(matches!(uuid, BluetoothUuid::Uuid128(_)));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn truncated_pdu_is_invalid() {
        let buf = [READ_RSP];
        // Read rsp with no payload decodes fine (zero-length value); exercise a truncated
        // fixed-width response instead.
        assert!(AttRsp::decode(&buf).is_ok());
        let short_mtu = [EXCHANGE_MTU_RSP, 0x01];
        assert_eq!(AttRsp::decode(&short_mtu), Err(Error::InvalidPdu));
    }
}
