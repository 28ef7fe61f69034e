//! One synchronous echo exchange: a server thread accepts a single
//! client, reads one message and the client prints the echo it sent.
//!
//! Run with: cargo run --example echo_once

use std::thread;
use std::time::Duration;

use hermes_net::{Endpoint, Result};

fn main() -> Result<()> {
    let server_thread = thread::spawn(|| -> Result<Vec<u8>> {
        let server = Endpoint::new("server", "tcp", false, "8888")?;
        println!("[server] waiting for one client on port 8888");
        server.run()?;
        let payload = server.receive()?;
        println!(
            "[server] received {} bytes: {}",
            payload.len(),
            String::from_utf8_lossy(&payload)
        );
        server.disconnect()?;
        Ok(payload)
    });

    thread::sleep(Duration::from_millis(100));

    let client = Endpoint::with_host("client", "tcp", false, "8888", "127.0.0.1")?;
    client.set_connect_hook(|| println!("[client] connected"));
    client.set_disconnect_hook(|| println!("[client] disconnected"));
    client.run()?;
    let sent = client.send(b"hello from hermes")?;
    println!("[client] sent {} bytes", sent);
    client.disconnect()?;

    server_thread.join().expect("server thread panicked")?;
    Ok(())
}
