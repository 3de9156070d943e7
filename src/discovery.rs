//! Discovery sub-procedures (§4.D): paginated walks over the attribute handle space to
//! enumerate services, characteristics, and descriptors.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_io_async::{Read, Write};
use heapless::Vec;

use crate::att::{AttErrorCode, AttReq, AttRsp};
use crate::connection::{is_attribute_not_found, AttConnection};
use crate::uuid::BluetoothUuid;
use crate::{BleHostError, Error};

/// GATT-level UUID for "Primary Service", used as the group type in
/// `READ_BY_GROUP_TYPE_REQ` walks (§4.D).
pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
/// GATT-level UUID for "Characteristic", used as the attribute type in
/// `READ_BY_TYPE_REQ` walks (§4.D).
pub const CHARACTERISTIC_UUID: u16 = 0x2803;

/// A discovered primary service: its declaration handle and the handle range it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredService {
    pub start_handle: u16,
    pub end_handle: u16,
    pub uuid: BluetoothUuid,
}

/// A discovered characteristic declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: u8,
    pub uuid: BluetoothUuid,
}

/// A discovered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredDescriptor {
    pub handle: u16,
    pub uuid: BluetoothUuid,
}

/// Walks the full `0x0001..=0xFFFF` handle range discovering every primary service group
/// (§4.D). Terminates on `ATTRIBUTE_NOT_FOUND` (treated as the end of the list) or when
/// the range is exhausted.
pub async fn discover_all_primary_services<R, W, M, const N: usize, const MAX: usize>(
    conn: &AttConnection<R, W, M, N>,
) -> Result<Vec<DiscoveredService, MAX>, BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let mut out: Vec<DiscoveredService, MAX> = Vec::new();
    let mut start: u16 = 0x0001;

    while start != 0 {
        let req = AttReq::ReadByGroupType { start, end: 0xFFFF, group_type: PRIMARY_SERVICE_UUID };
        let pdu = conn.send_request_and_await_response(req).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::ReadByGroupType { entry_len, data } => {
                let mut last_end = start;
                for entry in AttRsp::read_by_group_type_entries(entry_len, data) {
                    let (handle, end, value) = entry.map_err(BleHostError::from)?;
                    if handle < start || handle < last_end {
                        return Err(Error::InvalidResponse.into());
                    }
                    let uuid = BluetoothUuid::from_slice(value).map_err(BleHostError::from)?;
                    out.push(DiscoveredService { start_handle: handle, end_handle: end, uuid })
                        .map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                    last_end = end;
                }
                if last_end == 0xFFFF {
                    break;
                }
                start = last_end + 1;
            }
            AttRsp::Error { code, .. } if is_attribute_not_found(code) => break,
            AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
            _ => return Err(Error::InvalidResponse.into()),
        }
    }

    Ok(out)
}

/// Walks the handle range looking only for primary services matching `uuid`, using
/// `FIND_BY_TYPE_VALUE_REQ` (§4.D).
pub async fn discover_primary_services_by_uuid<R, W, M, const N: usize, const MAX: usize>(
    conn: &AttConnection<R, W, M, N>,
    uuid: BluetoothUuid,
) -> Result<Vec<DiscoveredService, MAX>, BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let raw = uuid.as_raw();
    let mut out: Vec<DiscoveredService, MAX> = Vec::new();
    let mut start: u16 = 0x0001;

    while start != 0 {
        let req = AttReq::FindByTypeValue {
            start,
            end: 0xFFFF,
            att_type: PRIMARY_SERVICE_UUID,
            att_value: raw,
        };
        let pdu = conn.send_request_and_await_response(req).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::FindByTypeValue { data } => {
                let mut last_end = start;
                for entry in AttRsp::find_by_type_value_entries(data) {
                    let (handle, end) = entry.map_err(BleHostError::from)?;
                    if handle < start || handle < last_end {
                        return Err(Error::InvalidResponse.into());
                    }
                    out.push(DiscoveredService { start_handle: handle, end_handle: end, uuid })
                        .map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                    last_end = end;
                }
                if last_end == 0xFFFF {
                    break;
                }
                start = last_end + 1;
            }
            AttRsp::Error { code, .. } if is_attribute_not_found(code) => break,
            AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
            _ => return Err(Error::InvalidResponse.into()),
        }
    }

    Ok(out)
}

/// Walks `[start, end]` discovering every characteristic declaration, using
/// `READ_BY_TYPE_REQ` against the `Characteristic` declaration UUID (§4.D).
///
/// If `filter` is `Some`, the walk still visits every declaration (so handle ranges stay
/// correct) but only characteristics whose UUID matches `filter` are kept, matching the
/// by-UUID discovery call (§9, resolved open question: the by-UUID race is avoided by
/// discovering unconditionally and filtering client-side rather than trusting a
/// server-side UUID filter that `READ_BY_TYPE_REQ` does not support for characteristics).
pub async fn discover_characteristics<R, W, M, const N: usize, const MAX: usize>(
    conn: &AttConnection<R, W, M, N>,
    start: u16,
    end: u16,
    filter: Option<BluetoothUuid>,
) -> Result<Vec<DiscoveredCharacteristic, MAX>, BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let mut out: Vec<DiscoveredCharacteristic, MAX> = Vec::new();
    let mut cursor = start;

    while cursor != 0 && cursor <= end {
        let req = AttReq::ReadByType { start: cursor, end, attribute_type: BluetoothUuid::from_u16(CHARACTERISTIC_UUID) };
        let pdu = conn.send_request_and_await_response(req).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::ReadByType { entry_len, data } => {
                let mut last_handle = cursor;
                for entry in AttRsp::read_by_type_entries(entry_len, data) {
                    let (declaration_handle, value) = entry.map_err(BleHostError::from)?;
                    if declaration_handle < cursor || declaration_handle < last_handle {
                        return Err(Error::InvalidResponse.into());
                    }
                    if value.len() < 3 {
                        return Err(Error::InvalidResponse.into());
                    }
                    let properties = value[0];
                    let value_handle = u16::from_le_bytes([value[1], value[2]]);
                    let uuid = BluetoothUuid::from_slice(&value[3..]).map_err(BleHostError::from)?;

                    if filter.map(|f| f == uuid).unwrap_or(true) {
                        out.push(DiscoveredCharacteristic { declaration_handle, value_handle, properties, uuid })
                            .map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                    }
                    last_handle = declaration_handle;
                }
                if last_handle >= end {
                    break;
                }
                cursor = last_handle + 1;
            }
            AttRsp::Error { code, .. } if is_attribute_not_found(code) => break,
            AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
            _ => return Err(Error::InvalidResponse.into()),
        }
    }

    Ok(out)
}

/// Discovers every descriptor handle owned by a characteristic, i.e. in `[value_handle + 1,
/// service_end_handle]` (§4.D), using `FIND_INFORMATION_REQ`.
pub async fn discover_descriptors<R, W, M, const N: usize, const MAX: usize>(
    conn: &AttConnection<R, W, M, N>,
    value_handle: u16,
    service_end_handle: u16,
) -> Result<Vec<DiscoveredDescriptor, MAX>, BleHostError<W::Error>>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    let mut out: Vec<DiscoveredDescriptor, MAX> = Vec::new();
    if value_handle >= service_end_handle {
        return Ok(out);
    }
    let mut cursor = value_handle + 1;

    while cursor != 0 && cursor <= service_end_handle {
        let req = AttReq::FindInformation { start: cursor, end: service_end_handle };
        let pdu = conn.send_request_and_await_response(req).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::FindInformation { format, data } => {
                let mut last_handle = cursor;
                for entry in AttRsp::find_information_entries(format, data) {
                    let (handle, uuid) = entry.map_err(BleHostError::from)?;
                    if handle < cursor || handle < last_handle {
                        return Err(Error::InvalidResponse.into());
                    }
                    out.push(DiscoveredDescriptor { handle, uuid })
                        .map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                    last_handle = handle;
                }
                if last_handle >= service_end_handle {
                    break;
                }
                cursor = last_handle + 1;
            }
            AttRsp::Error { code, .. } if is_attribute_not_found(code) => break,
            AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
            _ => return Err(Error::InvalidResponse.into()),
        }
    }

    Ok(out)
}

/// `true` if `code` corresponds to an unsupported-group-type error: the server does not
/// recognize the requested group type at all (§7, treated distinctly from an empty list).
pub fn is_unsupported_group_type(code: AttErrorCode) -> bool {
    matches!(code, AttErrorCode::UnsupportedGroupType)
}
