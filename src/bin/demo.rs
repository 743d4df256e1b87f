//! Modbus Stack Demo
//!
//! Starts a TCP slave on a local port and drives it with a master:
//! - reads and writes over all eight function codes
//! - an exception reply for an unmapped address
//! - a slave callback reacting to writes
//!
//! Usage: cargo run --bin demo [register_map.json]
//! Set RUST_LOG=debug (or modbus_stack=debug) for frame level logging.

use std::time::Duration;

use modbus_stack::{
    ModbusClient, ModbusError, ModbusFunction, ModbusTcpClient, ModbusTcpServer, RegisterContext,
    RegisterKind, SlaveEvent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_MAP: &str = r#"{
    "coils": [{"start_address": 0, "value": [false, false, false, false, false, false, false, false]}],
    "discrete_inputs": [{"start_address": 0, "value": [true, false, true, true]}],
    "holding_registers": [
        {"start_address": 0, "value": [100, 200, 300, 400], "description": "setpoints"},
        {"start_address": 40, "value": 0, "description": "write counter"}
    ],
    "input_registers": [{"start_address": 0, "value": [2301, 2298, 2310], "unit": "0.1V"}]
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("{}", modbus_stack::info());
    println!("=============================\n");

    let context = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading register map from {}", path);
            RegisterContext::from_json_file(&path)?
        }
        None => RegisterContext::from_json_str(DEFAULT_MAP)?,
    }
    .into_shared();

    let mut server = ModbusTcpServer::bind("127.0.0.1:0", context.clone()).await?;
    server.register_callback(ModbusFunction::WriteMultipleRegisters, |event, ctx| {
        if let SlaveEvent::WriteMultipleRegisters { values, .. } = event {
            let count = ctx
                .get(RegisterKind::HoldingRegister, 40, 1)
                .map(|v| v[0])
                .unwrap_or(0);
            let _ = ctx.set(
                RegisterKind::HoldingRegister,
                40,
                count.wrapping_add(values.len() as u16),
            );
        }
    });
    let addr = server.local_addr()?;
    let server = std::sync::Arc::new(server);
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    println!("📡 Slave listening on {}\n", addr);

    let mut client = ModbusTcpClient::connect(addr, Duration::from_secs(1)).await?;

    println!("📖 Reads");
    println!("  FC01 coils 0..8:          {:?}", client.read_01(1, 0, 8).await?);
    println!("  FC02 discrete inputs 0..4: {:?}", client.read_02(1, 0, 4).await?);
    println!("  FC03 holding 0..4:         {:?}", client.read_03(1, 0, 4).await?);
    println!("  FC04 input 0..3:           {:?}", client.read_04(1, 0, 3).await?);

    println!("\n✏️  Writes");
    client.write_05(1, 3, true).await?;
    client.write_06(1, 1, 0x1234).await?;
    let coils = client.write_0f(1, 4, &[true, false, true]).await?;
    let regs = client.write_10(1, 0, &[7, 8]).await?;
    println!("  FC0F wrote {} coils, FC10 wrote {} registers", coils, regs);
    println!("  coils now:    {:?}", client.read_01(1, 0, 8).await?);
    println!("  holding now:  {:?}", client.read_03(1, 0, 4).await?);
    println!("  write counter: {:?}", client.read_03(1, 40, 1).await?);

    println!("\n⚠️  Exceptions");
    match client.read_03(1, 1000, 1).await {
        Err(ModbusError::Exception { function, code }) => {
            println!("  FC{:02X} at 1000 -> {} ({})", function, code.to_u8(), code)
        }
        other => println!("  unexpected reply: {:?}", other),
    }

    println!("\n📊 Statistics");
    println!("  master: {:?}", client.get_stats());
    client.close().await?;

    server.shutdown();
    serving.await??;
    println!("  slave:  {:?}", server.stats());

    Ok(())
}
