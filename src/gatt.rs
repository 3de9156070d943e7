//! The GATT client façade (§4.G): the public entry point applications use to discover a
//! remote attribute database, read and write characteristic values, and subscribe to
//! notifications/indications.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::pubsub::{PubSubChannel, WaitResult};
use embedded_io_async::{Read, Write};
use heapless::{FnvIndexMap, Vec};

use crate::att::{self, AttReq, AttRsp};
use crate::config;
use crate::connection::AttConnection;
use crate::discovery::{self, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService};
use crate::transfer::{self, LongWriteGuard};
use crate::uuid::BluetoothUuid;
use crate::{BleHostError, Error};

/// The Client Characteristic Configuration Descriptor UUID (§4.F).
pub const CCCD_UUID: u16 = 0x2902;

const CCCD_NOTIFY_BIT: u16 = 0x0001;
const CCCD_INDICATE_BIT: u16 = 0x0002;

/// A discovered primary (or, once secondary-service discovery is added, any) service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub uuid: BluetoothUuid,
    pub is_primary: bool,
    pub handle: u16,
    pub end: u16,
}

/// A discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: BluetoothUuid,
    pub properties: u8,
    pub declaration_handle: u16,
    pub value_handle: u16,
}

/// A discovered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: BluetoothUuid,
    pub handle: u16,
}

impl From<DiscoveredService> for Service {
    fn from(d: DiscoveredService) -> Self {
        Service { uuid: d.uuid, is_primary: true, handle: d.start_handle, end: d.end_handle }
    }
}

impl From<DiscoveredCharacteristic> for Characteristic {
    fn from(d: DiscoveredCharacteristic) -> Self {
        Characteristic {
            uuid: d.uuid,
            properties: d.properties,
            declaration_handle: d.declaration_handle,
            value_handle: d.value_handle,
        }
    }
}

impl From<DiscoveredDescriptor> for Descriptor {
    fn from(d: DiscoveredDescriptor) -> Self {
        Descriptor { uuid: d.uuid, handle: d.handle }
    }
}

/// A notification or indication delivered for a subscribed characteristic, carrying the
/// value bytes bounded by the configured PDU size (§2a).
#[derive(Clone)]
pub struct Notification<const N: usize> {
    pub value_handle: u16,
    pub data: Vec<u8, N>,
}

/// The GATT client: owns an [`AttConnection`] and the notification/indication subscriber
/// maps (§4.F, §4.G). Construction performs an MTU exchange conditional on the caller's
/// preferred MTU, tolerating the exchange's own failure.
pub struct GattClient<R, W, M, const N: usize = 251>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    conn: AttConnection<R, W, M, N>,
    long_write_guard: LongWriteGuard<M>,
    subscriptions: BlockingMutex<M, Cell<FnvIndexMap<u16, bool, { config::GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS }>>>,
    events: PubSubChannel<
        M,
        Notification<N>,
        { config::GATT_CLIENT_NOTIFICATION_QUEUE_SIZE },
        { config::GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS },
        1,
    >,
}

impl<R, W, M, const N: usize> GattClient<R, W, M, N>
where
    R: Read,
    W: Write<Error = R::Error>,
    M: RawMutex,
{
    /// Builds a client over an already-connected ATT channel. If `preferred_mtu` exceeds
    /// the default of 23, an MTU exchange is attempted; its failure is swallowed (the
    /// client simply continues at the default MTU), matching §4.G's construction contract.
    pub async fn new(reader: R, writer: W, preferred_mtu: u16) -> Self {
        let conn = AttConnection::new(reader, writer);
        if preferred_mtu > config::ATT_DEFAULT_MTU {
            let _ = conn.exchange_mtu(preferred_mtu).await;
        }
        Self {
            conn,
            long_write_guard: LongWriteGuard::new(),
            subscriptions: BlockingMutex::new(Cell::new(FnvIndexMap::new())),
            events: PubSubChannel::new(),
        }
    }

    /// The connection multiplexer, for spawning its reader loop
    /// ([`AttConnection::run`]) alongside this client.
    pub fn connection(&self) -> &AttConnection<R, W, M, N> {
        &self.conn
    }

    /// The currently negotiated MTU (§4.B).
    pub fn maximum_transmission_unit(&self) -> u16 {
        self.conn.get_mtu()
    }

    /// Discovers every primary service on the remote database (§4.D).
    pub async fn discover_all_primary_services<const MAX: usize>(
        &self,
    ) -> Result<Vec<Service, MAX>, BleHostError<W::Error>> {
        let discovered: Vec<DiscoveredService, MAX> = discovery::discover_all_primary_services(&self.conn).await?;
        Ok(discovered.into_iter().map(Service::from).collect())
    }

    /// Discovers primary services matching `uuid` (§4.D).
    pub async fn discover_primary_services<const MAX: usize>(
        &self,
        uuid: BluetoothUuid,
    ) -> Result<Vec<Service, MAX>, BleHostError<W::Error>> {
        let discovered: Vec<DiscoveredService, MAX> =
            discovery::discover_primary_services_by_uuid(&self.conn, uuid).await?;
        Ok(discovered.into_iter().map(Service::from).collect())
    }

    /// Discovers every characteristic declared within `service` (§4.D).
    pub async fn discover_all_characteristics<const MAX: usize>(
        &self,
        service: Service,
    ) -> Result<Vec<Characteristic, MAX>, BleHostError<W::Error>> {
        let discovered: Vec<DiscoveredCharacteristic, MAX> =
            discovery::discover_characteristics(&self.conn, service.handle, service.end, None).await?;
        Ok(discovered.into_iter().map(Characteristic::from).collect())
    }

    /// Discovers characteristics within `service` whose UUID matches `uuid` (§4.D). The
    /// walk still visits every declaration in range so handle bookkeeping stays correct;
    /// only matching characteristics are kept (§4.D note on the by-UUID race).
    pub async fn discover_characteristics<const MAX: usize>(
        &self,
        service: Service,
        uuid: BluetoothUuid,
    ) -> Result<Vec<Characteristic, MAX>, BleHostError<W::Error>> {
        let discovered: Vec<DiscoveredCharacteristic, MAX> =
            discovery::discover_characteristics(&self.conn, service.handle, service.end, Some(uuid)).await?;
        Ok(discovered.into_iter().map(Characteristic::from).collect())
    }

    /// Discovers the descriptors owned by `characteristic` within `service` (§4.D).
    pub async fn discover_descriptors<const MAX: usize>(
        &self,
        characteristic: Characteristic,
        service: Service,
    ) -> Result<Vec<Descriptor, MAX>, BleHostError<W::Error>> {
        let discovered: Vec<DiscoveredDescriptor, MAX> =
            discovery::discover_descriptors(&self.conn, characteristic.value_handle, service.end).await?;
        Ok(discovered.into_iter().map(Descriptor::from).collect())
    }

    /// Reads the full value of `characteristic`, transparently following the read-blob
    /// continuation loop for values longer than one PDU (§4.C, §4.E).
    pub async fn read_characteristic<const MAX: usize>(
        &self,
        characteristic: Characteristic,
    ) -> Result<Vec<u8, MAX>, BleHostError<W::Error>> {
        transfer::read_long(&self.conn, characteristic.value_handle).await
    }

    /// Reads every characteristic in `[start, end]` whose type is `uuid` in a single
    /// `READ_BY_TYPE_REQ` round trip, returning `(value_handle, bytes)` pairs. Values are
    /// truncated to what fits in one PDU by design (§4.E) — callers needing the full
    /// value of a specific handle should follow up with [`GattClient::read_characteristic`].
    pub async fn read_characteristics_by_uuid<const MAX: usize>(
        &self,
        uuid: BluetoothUuid,
        range: (u16, u16),
    ) -> Result<Vec<(u16, Vec<u8, N>), MAX>, BleHostError<W::Error>> {
        let mut out: Vec<(u16, Vec<u8, N>), MAX> = Vec::new();
        let req = AttReq::ReadByType { start: range.0, end: range.1, attribute_type: uuid };
        let pdu = self.conn.send_request_and_await_response(req).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::ReadByType { entry_len, data } => {
                for entry in AttRsp::read_by_type_entries(entry_len, data) {
                    let (handle, value) = entry.map_err(BleHostError::from)?;
                    let mut bytes: Vec<u8, N> = Vec::new();
                    bytes.extend_from_slice(value).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                    out.push((handle, bytes)).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                }
            }
            AttRsp::Error { code, .. } => return Err(Error::Att(code).into()),
            _ => return Err(Error::InvalidResponse.into()),
        }
        Ok(out)
    }

    /// Reads two or more characteristics in a single `READ_MULTIPLE_REQ` round trip,
    /// returning the raw concatenated value bytes (§4.E). Callers must not rely on this
    /// when any individual value could be exactly `MTU - 1` bytes long, since the
    /// boundary between values is then unrecoverable.
    pub async fn read_multiple<const MAX: usize>(
        &self,
        characteristics: &[Characteristic],
    ) -> Result<Vec<u8, MAX>, BleHostError<W::Error>> {
        if characteristics.len() < 2 {
            return Err(BleHostError::Protocol(Error::InvalidValue));
        }
        let mut handles: Vec<u16, { att::MAX_READ_MULTIPLE_HANDLES }> = Vec::new();
        for c in characteristics {
            handles.push(c.value_handle).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
        }
        let pdu = self.conn.send_request_and_await_response(AttReq::ReadMultiple { handles: &handles }).await?;
        match pdu.as_response().map_err(BleHostError::from)? {
            AttRsp::ReadMultiple { data } => {
                let mut out: Vec<u8, MAX> = Vec::new();
                out.extend_from_slice(data).map_err(|_| BleHostError::Protocol(Error::InsufficientSpace))?;
                Ok(out)
            }
            AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
            _ => Err(Error::InvalidResponse.into()),
        }
    }

    /// Reads the value of a single descriptor (§4.E), via a plain `READ_REQ`, following
    /// the same read-blob continuation loop as [`GattClient::read_characteristic`].
    pub async fn read_descriptor<const MAX: usize>(
        &self,
        descriptor: Descriptor,
    ) -> Result<Vec<u8, MAX>, BleHostError<W::Error>> {
        transfer::read_long(&self.conn, descriptor.handle).await
    }

    /// Writes `data` to `characteristic` (§4.E). Values fitting in `MTU - 3` use a single
    /// `WRITE_REQ`; longer values go through the prepare/execute queue, with `reliable`
    /// selecting echo verification.
    pub async fn write_characteristic(
        &self,
        characteristic: Characteristic,
        data: &[u8],
        reliable: bool,
    ) -> Result<(), BleHostError<W::Error>> {
        self.write_value(characteristic.value_handle, data, reliable).await
    }

    /// Writes `data` to `descriptor` (§4.E), identical in shape to
    /// [`GattClient::write_characteristic`].
    pub async fn write_descriptor(
        &self,
        descriptor: Descriptor,
        data: &[u8],
        reliable: bool,
    ) -> Result<(), BleHostError<W::Error>> {
        self.write_value(descriptor.handle, data, reliable).await
    }

    async fn write_value(&self, handle: u16, data: &[u8], reliable: bool) -> Result<(), BleHostError<W::Error>> {
        let mtu = self.conn.get_mtu() as usize;
        if data.len() <= mtu.saturating_sub(3) {
            let pdu = self.conn.send_request_and_await_response(AttReq::Write { handle, data }).await?;
            return match pdu.as_response().map_err(BleHostError::from)? {
                AttRsp::Write => Ok(()),
                AttRsp::Error { code, .. } => Err(Error::Att(code).into()),
                _ => Err(Error::InvalidResponse.into()),
            };
        }
        transfer::write_long(&self.conn, &self.long_write_guard, handle, data, reliable).await
    }

    /// Writes `data` to `characteristic` without expecting a response (`WRITE_CMD`,
    /// §4.E). Unlike a `write_characteristic` call, a payload that would not fit in one
    /// PDU is never silently truncated: it is rejected with
    /// [`Error::PayloadTooLarge`] (REDESIGN FLAG, §9).
    pub async fn write_characteristic_without_response(
        &self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), BleHostError<W::Error>> {
        let mtu = self.conn.get_mtu() as usize;
        if data.len() > mtu.saturating_sub(3) {
            return Err(BleHostError::Protocol(Error::PayloadTooLarge));
        }
        self.conn.send_command(AttReq::WriteCommand { handle: characteristic.value_handle, data }).await
    }

    /// The signed-write stub (§4.E): refuses every call with [`Error::NotSupported`]
    /// rather than send an unsigned payload claiming to be signed, since CSRK signature
    /// generation is not implemented by this crate.
    pub async fn write_characteristic_signed(
        &self,
        _characteristic: Characteristic,
        _data: &[u8],
    ) -> Result<(), BleHostError<W::Error>> {
        Err(BleHostError::Protocol(Error::NotSupported))
    }

    /// Enables or disables notifications/indications for `characteristic` by writing its
    /// Client Characteristic Configuration Descriptor (§4.F). `descriptors` must contain
    /// the characteristic's descriptors (from a prior [`GattClient::discover_descriptors`]
    /// call); if none is a CCCD, fails with
    /// [`Error::ClientCharacteristicConfigurationNotAllowed`] without touching any state.
    pub async fn client_characteristic_configuration(
        &self,
        characteristic: Characteristic,
        descriptors: &[Descriptor],
        notifications: bool,
        indications: bool,
    ) -> Result<(), BleHostError<W::Error>> {
        let cccd = descriptors
            .iter()
            .find(|d| d.uuid == BluetoothUuid::from_u16(CCCD_UUID))
            .ok_or(BleHostError::Protocol(Error::ClientCharacteristicConfigurationNotAllowed))?;

        let mut value: u16 = 0;
        if notifications {
            value |= CCCD_NOTIFY_BIT;
        }
        if indications {
            value |= CCCD_INDICATE_BIT;
        }
        let bytes = value.to_le_bytes();

        self.write_value(cccd.handle, &bytes, false).await?;

        self.subscriptions.lock(|c| {
            let mut map = c.take();
            if notifications || indications {
                let _ = map.insert(characteristic.value_handle, true);
            } else {
                map.remove(&characteristic.value_handle);
            }
            c.set(map);
        });

        Ok(())
    }

    /// Subscribes to the stream of notifications/indications for characteristics that
    /// have an active CCCD write on this client (§4.F). Multiple callers may subscribe;
    /// each receives every event independently.
    pub fn notifications(
        &self,
    ) -> embassy_sync::pubsub::Subscriber<
        '_,
        M,
        Notification<N>,
        { config::GATT_CLIENT_NOTIFICATION_QUEUE_SIZE },
        { config::GATT_CLIENT_NOTIFICATION_MAX_SUBSCRIBERS },
        1,
    > {
        self.events.subscriber().expect("subscriber capacity exhausted")
    }

    /// Drives inbound server-initiated PDUs into the subscriber maps. Must be polled
    /// continuously (typically alongside [`AttConnection::run`]) for notifications and
    /// indications to reach [`GattClient::notifications`] subscribers (§4.F).
    pub async fn run_event_loop(&self) {
        loop {
            let event = self.conn.next_server_event().await;
            let (value_handle, data) = match event {
                crate::connection::ServerEvent::Notification { handle, data } => (handle, data),
                crate::connection::ServerEvent::Indication { handle, data } => (handle, data),
            };
            let is_subscribed = self.subscriptions.lock(|c| {
                let map = c.take();
                let subscribed = map.get(&value_handle).copied().unwrap_or(false);
                c.set(map);
                subscribed
            });
            if is_subscribed {
                self.events.publish_immediate(Notification { value_handle, data });
            }
        }
    }
}

/// Drains one notification from a subscriber, mapping a lagged/overrun subscriber to the
/// newest available event rather than an error.
pub async fn next_notification<'s, M, const N: usize, const QSIZE: usize, const SUBS: usize>(
    subscriber: &mut embassy_sync::pubsub::Subscriber<'s, M, Notification<N>, QSIZE, SUBS, 1>,
) -> Notification<N>
where
    M: RawMutex,
{
    loop {
        match subscriber.next_message().await {
            WaitResult::Message(m) => return m,
            WaitResult::Lagged(_) => continue,
        }
    }
}
