//! Device resync example
//!
//! Loads a device spec (and optionally a loop configuration) from JSON,
//! then keeps the device's status in sync until Ctrl+C, printing every
//! published status as JSON.
//!
//! Run with: cargo run --example sync_device -- --spec device.json
//!
//! Without `--spec` a spec for a standard Battery Service peripheral named
//! "Sensor" is used:
//!   cargo run --example sync_device -- --config sync.json

use ble_device_sync::{
    AdapterSession, Device, DeviceIdentity, DeviceSpec, LayoutConverter, Result, StatusSnapshot,
    SyncConfig,
};
use std::sync::Arc;

const SAMPLE_SPEC: &str = r#"{
    "protocol": { "name": "Sensor" },
    "properties": [
        {
            "name": "battery-level",
            "accessMode": "ReadOnly",
            "visitor": {
                "characteristicUuid": "2a19",
                "dataConverter": { "startIndex": 0, "endIndex": 0 }
            }
        }
    ]
}"#;

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,ble_device_sync=debug")
        .init();

    println!("BLE Device Sync");
    println!("===============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let name = arg_value(&args, "--name").unwrap_or_else(|| "sensor".to_string());

    let spec = match arg_value(&args, "--spec") {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| ble_device_sync::Error::Config(format!("{}: {}", path, e)))?;
            DeviceSpec::from_json(&json)?
        }
        None => DeviceSpec::from_json(SAMPLE_SPEC)?,
    };

    let config = match arg_value(&args, "--config") {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| ble_device_sync::Error::Config(format!("{}: {}", path, e)))?;
            SyncConfig::from_json(&json)?
        }
        None => SyncConfig::default(),
    };

    println!("Properties:");
    for property in &spec.properties {
        println!(
            "  {} ({}) on {}",
            property.name, property.access_mode, property.visitor.characteristic_uuid
        );
    }
    println!("Resyncing every {:?}\n", config.sync_interval);

    let publisher = |device: &DeviceIdentity, status: &StatusSnapshot| {
        match serde_json::to_string_pretty(status) {
            Ok(json) => println!("{}:\n{}\n", device, json),
            Err(e) => eprintln!("Failed to encode status of {}: {}", device, e),
        }
    };

    let device = Device::new(
        DeviceIdentity::new("default", name),
        Arc::new(AdapterSession::new().await?),
        Arc::new(LayoutConverter),
        Arc::new(publisher),
        config,
    )?;

    device.configure(spec, StatusSnapshot::new()).await;

    println!("Press Ctrl+C to stop\n");
    let _ = tokio::signal::ctrl_c().await;

    device.shutdown().await;
    println!("Done.");

    Ok(())
}
