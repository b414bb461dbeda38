use std::io::{self, Write};
use std::time::Duration;

use labelprinter::{PrinterTransport, tspl};

/// Example: interactive label print session
/// - Scans for BLE devices
/// - Lets user select the printer
/// - Sends a TSPL label and runs the print job
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let transport = PrinterTransport::new().await?;
    transport.set_log_callback(|line| println!("[printer] {line}"));

    println!("Scanning for BLE devices for 3 seconds...");
    let devices = transport.scan(Duration::from_secs(3)).await?;
    if devices.is_empty() {
        println!(
            "No devices found. Make sure your Bluetooth adapter is up and the printer is powered on and advertising."
        );
        return Ok(());
    }

    println!("Found devices:");
    for (i, d) in devices.iter().enumerate() {
        println!("  {}) id={} name={:?}", i + 1, d.id, d.name);
    }

    // Ask user to pick a device
    let mut input = String::new();
    let chosen = loop {
        print!("Select device number to connect to (1-{}): ", devices.len());
        io::stdout().flush()?;
        input.clear();
        io::stdin().read_line(&mut input)?;
        if let Ok(n) = input.trim().parse::<usize>() {
            if n >= 1 && n <= devices.len() {
                break &devices[n - 1];
            }
        }
        println!("Invalid selection.");
    };

    println!("Connecting to device id={} name={:?} ...", chosen.id, chosen.name);
    transport.request_device_by_id(&chosen.id).await?;
    transport.connect().await?;
    println!("Connected successfully.");

    let mut content = String::new();
    print!("Enter the label text to print: ");
    io::stdout().flush()?;
    io::stdin().read_line(&mut content)?;
    let content = content.trim();
    if content.is_empty() {
        println!("No text entered, aborting.");
        transport.disconnect().await;
        return Ok(());
    }

    println!("Sending print job...");
    let mut label = String::new();
    label.push_str(&tspl::direction(1));
    label.push_str(&tspl::cls());
    label.push_str(&tspl::text(100, 50, "0", 90, 1, 1, content));
    label.push_str(&tspl::print(1, 1));
    match transport.send_utf8(&label).await {
        Ok(()) => println!("Label sent."),
        Err(e) => eprintln!("Print job failed: {e}"),
    }

    transport.disconnect().await;
    Ok(())
}
