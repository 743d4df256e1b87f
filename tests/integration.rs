//! End-to-end master/slave scenarios over in-memory RTU links and real TCP sockets

use std::sync::Arc;
use std::time::Duration;

use modbus_stack::rtu;
use modbus_stack::{
    ExceptionCode, GenericModbusClient, ModbusClient, ModbusError, ModbusFunction, ModbusPdu,
    ModbusRequest, ModbusRtuServer, ModbusTcpClient, ModbusTcpServer, RegisterContext,
    RegisterKind, RtuTransport, SharedContext, SlaveEvent, TcpTransport,
};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

const SILENCE: Duration = Duration::from_millis(2);
const TIMEOUT: Duration = Duration::from_millis(500);

/// Coils 1000..=1009 alternate true/false; holding registers start at 1000
fn scenario_context() -> SharedContext {
    RegisterContext::from_json_str(
        r#"{
            "coils": [{
                "start_address": 1000,
                "value": [true, false, true, false, true, false, true, false, true, false]
            }],
            "discrete_inputs": [{"register": 0, "val": [1, 0, 1]}],
            "holding_registers": [
                {"start_address": 1000, "value": [1, 515, 1029, 1543], "description": "block"},
                {"start_address": 2000, "value": 0}
            ],
            "input_registers": [{"start_address": 0, "initial_values": [11, 22]}]
        }"#,
    )
    .unwrap()
    .into_shared()
}

type RtuClient = GenericModbusClient<RtuTransport<tokio::io::DuplexStream>>;

fn rtu_pair(context: SharedContext) -> (RtuClient, JoinHandle<()>) {
    let (master_side, slave_side) = duplex(1024);
    let mut server = ModbusRtuServer::new(slave_side, context, 1);
    server.set_silence(SILENCE);
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (GenericModbusClient::new(RtuTransport::new(master_side, SILENCE)), task)
}

async fn tcp_pair(context: SharedContext) -> (ModbusTcpClient, Arc<ModbusTcpServer>) {
    let server = ModbusTcpServer::bind("127.0.0.1:0", context).await.unwrap();
    tcp_pair_with(server).await
}

async fn tcp_pair_with(server: ModbusTcpServer) -> (ModbusTcpClient, Arc<ModbusTcpServer>) {
    let addr = server.local_addr().unwrap();
    let server = Arc::new(server);
    let serving = server.clone();
    tokio::spawn(async move { serving.run().await });
    let client = ModbusTcpClient::connect(addr, TIMEOUT).await.unwrap();
    (client, server)
}

/// The same checks over any master
async fn coil_and_register_scenario<C: ModbusClient>(client: &mut C) {
    assert_eq!(client.read_coils(1, 1000, 1, TIMEOUT).await.unwrap(), vec![true]);
    assert_eq!(client.read_coils(1, 1001, 1, TIMEOUT).await.unwrap(), vec![false]);
    assert_eq!(
        client.read_coils(1, 1000, 3, TIMEOUT).await.unwrap(),
        vec![true, false, true]
    );

    assert_eq!(
        client.read_holding_registers(1, 1001, 2, TIMEOUT).await.unwrap(),
        vec![0x0203, 0x0405]
    );

    assert!(client.write_single_coil(1, 1001, true, TIMEOUT).await.unwrap());
    assert_eq!(
        client.read_coils(1, 1000, 3, TIMEOUT).await.unwrap(),
        vec![true, true, true]
    );
}

async fn write_read_scenario<C: ModbusClient>(client: &mut C) {
    assert_eq!(client.write_single_register(1, 2000, 0xBEEF, TIMEOUT).await.unwrap(), 0xBEEF);
    assert_eq!(client.read_holding_registers(1, 2000, 1, TIMEOUT).await.unwrap(), vec![0xBEEF]);

    assert_eq!(
        client.write_multiple_registers(1, 1000, &[9, 8, 7], TIMEOUT).await.unwrap(),
        3
    );
    assert_eq!(
        client.read_holding_registers(1, 1000, 4, TIMEOUT).await.unwrap(),
        vec![9, 8, 7, 0x0607]
    );

    assert_eq!(
        client.write_multiple_coils(1, 1005, &[true, false, true], TIMEOUT).await.unwrap(),
        3
    );
    assert_eq!(
        client.read_coils(1, 1005, 3, TIMEOUT).await.unwrap(),
        vec![true, false, true]
    );

    assert_eq!(
        client.read_discrete_inputs(1, 0, 3, TIMEOUT).await.unwrap(),
        vec![true, false, true]
    );
    assert_eq!(client.read_input_registers(1, 0, 2, TIMEOUT).await.unwrap(), vec![11, 22]);
}

async fn out_of_range_scenario<C: ModbusClient>(client: &mut C) {
    let err = client.read_holding_registers(1, 1002, 5, TIMEOUT).await.unwrap_err();
    match err {
        ModbusError::Exception { function, code } => {
            assert_eq!(function, 0x03);
            assert_eq!(code, ExceptionCode::IllegalDataAddress);
        }
        other => panic!("expected exception, got {:?}", other),
    }

    // A failed multi-write leaves every register untouched
    let err = client
        .write_multiple_registers(1, 1002, &[1, 1, 1], TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModbusError::Exception { code: ExceptionCode::IllegalDataAddress, .. }
    ));
    assert_eq!(
        client.read_holding_registers(1, 1002, 2, TIMEOUT).await.unwrap(),
        vec![0x0405, 0x0607]
    );
}

// ============================================================================
// RTU
// ============================================================================

#[tokio::test]
async fn rtu_coil_and_register_scenario() {
    let (mut client, _slave) = rtu_pair(scenario_context());
    coil_and_register_scenario(&mut client).await;
}

#[tokio::test]
async fn rtu_write_then_read_round_trip() {
    let (mut client, _slave) = rtu_pair(scenario_context());
    write_read_scenario(&mut client).await;
    let stats = client.get_stats();
    assert_eq!(stats.requests_sent, stats.responses_received);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn rtu_out_of_range_is_illegal_data_address() {
    let (mut client, _slave) = rtu_pair(scenario_context());
    out_of_range_scenario(&mut client).await;
}

#[tokio::test]
async fn rtu_other_unit_times_out() {
    let (mut client, _slave) = rtu_pair(scenario_context());
    let err = client
        .read_holding_registers(7, 1000, 1, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    // The link still works for the served unit
    assert_eq!(client.read_holding_registers(1, 1000, 1, TIMEOUT).await.unwrap(), vec![1]);
}

#[tokio::test]
async fn rtu_broadcast_write_applies_without_reply() {
    let context = scenario_context();
    let (mut master_side, slave_side) = duplex(1024);
    let mut server = ModbusRtuServer::new(slave_side, context.clone(), 1);
    server.set_silence(SILENCE);
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let request = ModbusPdu::from_slice(&[0x06, 0x07, 0xD0, 0x12, 0x34]).unwrap();
    master_side.write_all(&rtu::encode_adu(0, &request)).await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_millis(100), master_side.read(&mut buf)).await;
    assert!(read.is_err(), "slave answered a broadcast");
    assert_eq!(
        context.lock().get(RegisterKind::HoldingRegister, 2000, 1).unwrap(),
        vec![0x1234]
    );
}

#[tokio::test]
async fn rtu_broadcast_from_master_returns_echo() {
    let context = scenario_context();
    let (mut client, _slave) = rtu_pair(context.clone());

    let echo = client.write_single_register(0, 2000, 77, TIMEOUT).await.unwrap();
    assert_eq!(echo, 77);

    // Broadcast reads are refused locally
    let err = client.read_holding_registers(0, 2000, 1, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ModbusError::InvalidData { .. }));

    // The next addressed request sees the broadcast value
    assert_eq!(client.read_holding_registers(1, 2000, 1, TIMEOUT).await.unwrap(), vec![77]);
}

#[tokio::test(start_paused = true)]
async fn rtu_timeout_on_silent_line() {
    let (master_side, _silent) = duplex(1024);
    let mut client = GenericModbusClient::new(RtuTransport::new(master_side, SILENCE));

    let timeout = Duration::from_millis(300);
    let start = tokio::time::Instant::now();
    let err = client.read_holding_registers(1, 0, 1, timeout).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ModbusError::Timeout { timeout_ms: 300, .. }));
    assert!(elapsed >= timeout, "gave up after {:?}", elapsed);
    assert!(elapsed < timeout * 2, "waited {:?}", elapsed);
    assert_eq!(client.get_stats().timeouts, 1);
}

// ============================================================================
// TCP
// ============================================================================

#[tokio::test]
async fn tcp_coil_and_register_scenario() {
    let (mut client, _server) = tcp_pair(scenario_context()).await;
    coil_and_register_scenario(&mut client).await;
}

#[tokio::test]
async fn tcp_write_then_read_round_trip() {
    let (mut client, server) = tcp_pair(scenario_context()).await;
    write_read_scenario(&mut client).await;
    assert!(client.is_connected());

    let stats = server.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.exception_responses, 0);
    assert_eq!(stats.requests, client.get_stats().responses_received);
}

#[tokio::test]
async fn tcp_out_of_range_is_illegal_data_address() {
    let (mut client, server) = tcp_pair(scenario_context()).await;
    out_of_range_scenario(&mut client).await;
    assert_eq!(server.stats().exception_responses, 2);
}

#[tokio::test]
async fn tcp_serves_every_unit_id() {
    let (mut client, _server) = tcp_pair(scenario_context()).await;
    assert_eq!(client.read_04(0, 0, 1).await.unwrap(), vec![11]);
    assert_eq!(client.read_04(200, 1, 1).await.unwrap(), vec![22]);
}

#[tokio::test]
async fn tcp_connections_share_one_context() {
    let context = scenario_context();
    let server = ModbusTcpServer::bind("127.0.0.1:0", context.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (mut first, server) = tcp_pair_with(server).await;
    let mut second = ModbusTcpClient::connect(addr, TIMEOUT).await.unwrap();

    let (a, b) = tokio::join!(
        first.write_06(1, 1000, 0x0A0A),
        second.write_06(1, 1001, 0x0B0B)
    );
    assert_eq!(a.unwrap(), 0x0A0A);
    assert_eq!(b.unwrap(), 0x0B0B);

    assert_eq!(first.read_03(1, 1000, 2).await.unwrap(), vec![0x0A0A, 0x0B0B]);
    assert_eq!(second.read_03(1, 1000, 2).await.unwrap(), vec![0x0A0A, 0x0B0B]);
    assert_eq!(server.stats().connections, 2);
}

#[tokio::test]
async fn tcp_callbacks_see_applied_writes() {
    let context = scenario_context();
    let mut server = ModbusTcpServer::bind("127.0.0.1:0", context.clone()).await.unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    server.register_callback(ModbusFunction::WriteMultipleCoils, move |event, ctx| {
        sink.lock().push(event.clone());
        // Latch a holding register whenever coils are written
        ctx.set(RegisterKind::HoldingRegister, 2000, 1).unwrap();
    });
    let reads = Arc::new(Mutex::new(0u32));
    let counter = reads.clone();
    server.register_callback(ModbusFunction::ReadCoils, move |_, _| {
        *counter.lock() += 1;
    });
    let (mut client, _server) = tcp_pair_with(server).await;

    assert_eq!(client.write_0f(1, 1000, &[false, false]).await.unwrap(), 2);
    assert_eq!(client.read_01(1, 1000, 2).await.unwrap(), vec![false, false]);
    // Failed request: no callback
    assert!(client.read_01(1, 5000, 1).await.is_err());

    assert_eq!(
        events.lock().as_slice(),
        &[SlaveEvent::WriteMultipleCoils {
            address: 1000,
            values: vec![false, false]
        }]
    );
    assert_eq!(*reads.lock(), 1);
    assert_eq!(client.read_03(1, 2000, 1).await.unwrap(), vec![1]);
}

#[tokio::test]
async fn tcp_shutdown_stops_accept_loop() {
    let server = ModbusTcpServer::bind("127.0.0.1:0", scenario_context()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server = Arc::new(server);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    let mut client = ModbusTcpClient::connect(addr, TIMEOUT).await.unwrap();
    assert_eq!(client.read_03(1, 1000, 1).await.unwrap(), vec![1]);

    server.shutdown();
    serving.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The open connection is closed as well
    let err = client.read_03(1, 1000, 1).await.unwrap_err();
    assert!(matches!(err, ModbusError::Connection { .. } | ModbusError::Io(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn tcp_shutdown_before_run_is_remembered() {
    let server = ModbusTcpServer::bind("127.0.0.1:0", scenario_context()).await.unwrap();
    server.shutdown();

    let result = tokio::time::timeout(TIMEOUT, server.run()).await;
    assert!(matches!(result, Ok(Ok(()))));
}

#[tokio::test]
async fn tcp_panicking_callback_releases_connection_slot() {
    let context = scenario_context();
    let mut server = ModbusTcpServer::bind("127.0.0.1:0", context).await.unwrap();
    server.register_callback(ModbusFunction::WriteSingleRegister, |_event, _ctx| {
        panic!("callback failure");
    });
    let (mut client, server) = tcp_pair_with(server).await;

    assert!(client.write_06(1, 2000, 5).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = server.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.active_connections, 0);

    // The register lock was released on unwind; a fresh connection is served
    let mut other = ModbusTcpClient::connect(server.local_addr().unwrap(), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(other.read_03(1, 2000, 1).await.unwrap(), vec![5]);
}

#[tokio::test(start_paused = true)]
async fn tcp_timeout_on_silent_peer() {
    let (master_side, _silent) = duplex(1024);
    let mut client = GenericModbusClient::new(TcpTransport::new(master_side));

    let timeout = Duration::from_millis(250);
    let start = tokio::time::Instant::now();
    let err = client.read_input_registers(1, 0, 1, timeout).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout * 2);
}

#[tokio::test]
async fn invalid_arguments_never_reach_the_wire() {
    let (mut client, server) = tcp_pair(scenario_context()).await;
    let err = client.read_holding_registers(1, 0, 126, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ModbusError::InvalidData { .. }));
    let err = client
        .execute(1, ModbusRequest::ReadCoils { address: 65535, quantity: 2 }, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, ModbusError::InvalidData { .. }));

    assert_eq!(client.get_stats().requests_sent, 0);
    assert_eq!(server.stats().requests, 0);
}
