//! End-to-end scenarios (§8) driven over a loopback `tokio::io::duplex` pair. The "server"
//! side of each test is a hand-scripted sequence of canned ATT PDUs; it plays the role of
//! the remote peer this crate's `AttConnection` was written to drive.

use std::sync::Arc;

use ble_gatt_client::att::{AttErrorCode, AttRsp, ServerInitiatedPdu};
use ble_gatt_client::{BleHostError, BluetoothUuid, Characteristic, Descriptor, Error, GattClient};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_io_adapters::tokio_1::FromTokio;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

type ClientReader = FromTokio<ReadHalf<DuplexStream>>;
type ClientWriter = FromTokio<WriteHalf<DuplexStream>>;
type Client = GattClient<ClientReader, ClientWriter, CriticalSectionRawMutex>;

const ATT_CID: u16 = 0x0004;

/// Reads one L2CAP-framed ATT PDU off the mock server's end of the duplex pair.
async fn recv_pdu(server: &mut DuplexStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    server.read_exact(&mut header).await.expect("client closed connection");
    let len = u16::from_le_bytes([header[0], header[1]]) as usize;
    let channel = u16::from_le_bytes([header[2], header[3]]);
    assert_eq!(channel, ATT_CID, "only ATT traffic is exercised by these scenarios");
    let mut pdu = vec![0u8; len];
    server.read_exact(&mut pdu).await.expect("truncated PDU");
    pdu
}

/// Writes one L2CAP-framed ATT PDU from the mock server's end of the duplex pair.
async fn send_pdu(server: &mut DuplexStream, pdu: &[u8]) {
    let mut header = [0u8; 4];
    header[0..2].copy_from_slice(&(pdu.len() as u16).to_le_bytes());
    header[2..4].copy_from_slice(&ATT_CID.to_le_bytes());
    server.write_all(&header).await.unwrap();
    server.write_all(pdu).await.unwrap();
}

async fn send_rsp(server: &mut DuplexStream, rsp: AttRsp<'_>) {
    let mut buf = [0u8; 256];
    let n = rsp.encode(&mut buf).unwrap();
    send_pdu(server, &buf[..n]).await;
}

fn u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Spins up a client over one half of a loopback duplex pair and returns it (already
/// spawned with its reader loop running in the background) plus the mock server's half.
async fn setup() -> (Arc<Client>, DuplexStream) {
    let (client_side, server_side) = tokio::io::duplex(8192);
    let (client_read, client_write) = split(client_side);
    let client = Arc::new(Client::new(FromTokio::new(client_read), FromTokio::new(client_write), 23).await);

    let reader_client = client.clone();
    tokio::spawn(async move {
        let _ = reader_client.connection().run().await;
    });

    (client, server_side)
}

// Scenario 1: discover-one-service.
#[tokio::test]
async fn discover_one_primary_service() {
    let (client, mut server) = setup().await;

    let server_task = tokio::spawn(async move {
        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::READ_BY_GROUP_TYPE_REQ);
        assert_eq!(u16_le(&req, 1), 0x0001);
        send_rsp(
            &mut server,
            AttRsp::ReadByGroupType { entry_len: 6, data: &[0x01, 0x00, 0x05, 0x00, 0x0D, 0x18] },
        )
        .await;

        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::READ_BY_GROUP_TYPE_REQ);
        assert_eq!(u16_le(&req, 1), 0x0006);
        send_rsp(
            &mut server,
            AttRsp::Error { request_opcode: ble_gatt_client::att::READ_BY_GROUP_TYPE_REQ, handle: 0x0006, code: AttErrorCode::AttributeNotFound },
        )
        .await;
    });

    let services = client.discover_all_primary_services::<4>().await.unwrap();
    server_task.await.unwrap();

    assert_eq!(services.len(), 1);
    assert_eq!(services[0].handle, 0x0001);
    assert_eq!(services[0].end, 0x0005);
    assert_eq!(services[0].uuid, BluetoothUuid::from_u16(0x180D));
}

// Scenario 2: a 42-byte characteristic value read, spanning the default 23-byte MTU.
#[tokio::test]
async fn read_characteristic_spanning_multiple_pdus() {
    let (client, mut server) = setup().await;
    let characteristic = Characteristic { uuid: BluetoothUuid::from_u16(0x2A37), properties: 0x02, declaration_handle: 0x0F, value_handle: 0x10 };

    let first_chunk: Vec<u8> = (0..22u8).collect();
    let second_chunk: Vec<u8> = (22..42u8).collect();

    let server_task = tokio::spawn(async move {
        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::READ_REQ);
        assert_eq!(u16_le(&req, 1), 0x0010);
        send_rsp(&mut server, AttRsp::Read { data: &first_chunk }).await;

        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::READ_BLOB_REQ);
        assert_eq!(u16_le(&req, 1), 0x0010);
        assert_eq!(u16_le(&req, 3), 22);
        send_rsp(&mut server, AttRsp::ReadBlob { data: &second_chunk }).await;
    });

    let value: heapless::Vec<u8, 64> = client.read_characteristic(characteristic).await.unwrap();
    server_task.await.unwrap();

    assert_eq!(value.len(), 42);
    let expected: Vec<u8> = (0..42u8).collect();
    assert_eq!(value.as_slice(), expected.as_slice());
}

// Scenario 3: a 50-byte reliable write, chunked through prepare/execute.
#[tokio::test]
async fn write_characteristic_reliable_long_write() {
    let (client, mut server) = setup().await;
    let characteristic = Characteristic { uuid: BluetoothUuid::from_u16(0x2A3D), properties: 0x08, declaration_handle: 0x1F, value_handle: 0x20 };
    let payload: Vec<u8> = (0..50u8).collect();

    let server_task = tokio::spawn(async move {
        for &offset in &[0u16, 18, 36] {
            let req = recv_pdu(&mut server).await;
            assert_eq!(req[0], ble_gatt_client::att::PREPARE_WRITE_REQ);
            assert_eq!(u16_le(&req, 1), 0x0020);
            assert_eq!(u16_le(&req, 3), offset);
            let echoed = req[5..].to_vec();
            send_rsp(&mut server, AttRsp::PrepareWrite { handle: 0x0020, offset, data: &echoed }).await;
        }

        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::EXECUTE_WRITE_REQ);
        assert_eq!(req[1], ble_gatt_client::att::EXECUTE_WRITE_WRITE);
        send_rsp(&mut server, AttRsp::ExecuteWrite).await;
    });

    client.write_characteristic(characteristic, &payload, true).await.unwrap();
    server_task.await.unwrap();
}

// Scenario 4: a reliable write whose echoed chunk does not match what was sent.
#[tokio::test]
async fn write_characteristic_reliable_echo_mismatch_aborts() {
    let (client, mut server) = setup().await;
    let characteristic = Characteristic { uuid: BluetoothUuid::from_u16(0x2A3D), properties: 0x08, declaration_handle: 0x1F, value_handle: 0x20 };
    let payload: Vec<u8> = (0..50u8).collect();

    let server_task = tokio::spawn(async move {
        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::PREPARE_WRITE_REQ);
        // Echo back a corrupted first byte instead of what the client actually sent.
        let mut corrupted = req[5..].to_vec();
        corrupted[0] ^= 0xFF;
        send_rsp(&mut server, AttRsp::PrepareWrite { handle: 0x0020, offset: 0, data: &corrupted }).await;

        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::EXECUTE_WRITE_REQ);
        assert_eq!(req[1], ble_gatt_client::att::EXECUTE_WRITE_CANCEL);
        send_rsp(&mut server, AttRsp::ExecuteWrite).await;
    });

    let result = client.write_characteristic(characteristic, &payload, true).await;
    server_task.await.unwrap();

    assert!(matches!(result, Err(BleHostError::Protocol(Error::InvalidResponse))));
}

// Scenario 5: enabling notifications via the CCCD, then receiving one.
#[tokio::test]
async fn enable_notifications_and_receive_one() {
    let (client, mut server) = setup().await;
    let characteristic = Characteristic { uuid: BluetoothUuid::from_u16(0x2A37), properties: 0x10, declaration_handle: 0x2F, value_handle: 0x30 };
    let cccd = Descriptor { uuid: BluetoothUuid::from_u16(ble_gatt_client::gatt::CCCD_UUID), handle: 0x0031 };

    let server_task = tokio::spawn(async move {
        let req = recv_pdu(&mut server).await;
        assert_eq!(req[0], ble_gatt_client::att::WRITE_REQ);
        assert_eq!(u16_le(&req, 1), 0x0031);
        assert_eq!(u16_le(&req, 3), 0x0001); // notifications bit set, indications clear
        send_rsp(&mut server, AttRsp::Write).await;

        let mut pdu = [0u8; 16];
        let n = ServerInitiatedPdu::Notification { handle: 0x0030, data: &[0xAA, 0xBB] }.encode(&mut pdu).unwrap();
        send_pdu(&mut server, &pdu[..n]).await;
    });

    client.client_characteristic_configuration(characteristic, &[cccd], true, false).await.unwrap();

    let event_loop_client = client.clone();
    tokio::spawn(async move {
        event_loop_client.run_event_loop().await;
    });

    let mut subscriber = client.notifications();
    let notification = ble_gatt_client::gatt::next_notification(&mut subscriber).await;
    server_task.await.unwrap();

    assert_eq!(notification.value_handle, 0x0030);
    assert_eq!(notification.data.as_slice(), &[0xAA, 0xBB]);
}

// Scenario 6: an indication is confirmed on the wire before anything else happens,
// regardless of whether any subscriber is registered for its handle.
#[tokio::test]
async fn indication_is_confirmed_even_without_a_subscriber() {
    let (_client, mut server) = setup().await;

    let mut pdu = [0u8; 16];
    let n = ServerInitiatedPdu::Indication { handle: 0x0040, data: &[1, 2, 3] }.encode(&mut pdu).unwrap();
    send_pdu(&mut server, &pdu[..n]).await;

    let confirmation = recv_pdu(&mut server).await;
    assert_eq!(confirmation, vec![ble_gatt_client::att::HANDLE_VALUE_CONFIRMATION]);
}
