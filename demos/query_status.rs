use std::io::{self, Write};
use std::time::Duration;

use labelprinter::PrinterTransport;

/// Example: query the printer and watch unsolicited output
/// - Scans for printers advertising the Alpha-2R service
/// - Sends a command and waits for the idle-timeout framed reply
/// - Prints any unsolicited notification data
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let transport = PrinterTransport::new().await?;
    transport.set_log_callback(|line| println!("[printer] {line}"));
    transport.set_unsolicited_callback(|chunk| {
        println!("[unsolicited] {}", String::from_utf8_lossy(&chunk));
    });

    println!("Scanning for a printer for 3 seconds...");
    let device = match transport.request_device(Duration::from_secs(3)).await {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Discovery failed: {e}");
            return Ok(());
        }
    };
    println!("Using device id={} name={:?}", device.id, device.name);

    transport.connect().await?;
    println!("Connected successfully.");

    let mut command = String::new();
    print!("Enter a command to send (default \"STATUS?\"): ");
    io::stdout().flush()?;
    io::stdin().read_line(&mut command)?;
    let command = match command.trim() {
        "" => "STATUS?",
        other => other,
    };

    match transport.send_utf8_with_response(command).await {
        Ok(reply) => {
            println!("Reply ({} bytes): {}", reply.len(), String::from_utf8_lossy(&reply));
        }
        Err(e) => eprintln!("No reply: {e}"),
    }

    transport.disconnect().await;
    Ok(())
}
