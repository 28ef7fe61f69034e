//! End-to-end messenger scenarios over real loopback sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hermes_net::{Endpoint, NetworkError};

/// Retries `run` until the peer is listening.
fn run_with_retry(endpoint: &Endpoint, deadline: Duration) {
    let start = Instant::now();
    loop {
        match endpoint.run() {
            Ok(()) => return,
            Err(_) if start.elapsed() < deadline => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => panic!("endpoint.run did not succeed in time: {}", e),
        }
    }
}

#[test]
fn sync_tcp_echo_once() {
    let server_thread = thread::spawn(|| {
        let server = Endpoint::new("server", "tcp", false, "8891").unwrap();
        // blocks until the client below connects
        server.run().unwrap();
        let received = server.receive().unwrap();
        server.disconnect().unwrap();
        received
    });

    thread::sleep(Duration::from_micros(250));
    let client = Endpoint::with_host("client", "tcp", false, "8891", "127.0.0.1").unwrap();
    run_with_retry(&client, Duration::from_secs(5));
    assert_eq!(client.send(b"123456789").unwrap(), 9);
    client.disconnect().unwrap();
    assert!(!client.is_connected());

    let received = server_thread.join().unwrap();
    assert_eq!(received, b"123456789");
}

#[test]
fn hundred_clients_sequential_accept() {
    let server = Arc::new(Endpoint::new("server", "tcp", true, "8892").unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));

    {
        let hook_server = Arc::clone(&server);
        let accepted = Arc::clone(&accepted);
        server.set_connect_hook(move || {
            if accepted.fetch_add(1, Ordering::SeqCst) + 1 == 100 {
                let _ = hook_server.disconnect();
            }
        });
    }
    server.run().unwrap();

    for _ in 0..100 {
        let client = Endpoint::with_host("client", "tcp", true, "8892", "127.0.0.1").unwrap();
        run_with_retry(&client, Duration::from_secs(5));
        client.disconnect().unwrap();
    }

    let start = Instant::now();
    while accepted.load(Ordering::SeqCst) < 100 {
        assert!(
            start.elapsed() < Duration::from_secs(30),
            "server accepted only {} connections",
            accepted.load(Ordering::SeqCst)
        );
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 100);

    let start = Instant::now();
    while server.is_connected() {
        assert!(start.elapsed() < Duration::from_secs(10));
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn hundred_threads_disconnect_once() {
    // a reachable peer for the client to connect to
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    let peer = thread::spawn(move || listener.accept().map(|(socket, _)| socket));

    let client =
        Arc::new(Endpoint::with_host("client", "tcp", false, &port, "127.0.0.1").unwrap());
    client.run().unwrap();
    let _peer_socket = peer.join().unwrap().unwrap();
    assert!(client.is_connected());

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.disconnect())
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert!(!client.is_connected());
}

#[test]
fn bad_configuration_opens_no_socket() {
    match Endpoint::new("robot", "tcp", false, "9000") {
        Err(NetworkError::Configuration(_)) => {}
        other => panic!("expected a configuration error, got {:?}", other.err()),
    }

    // the port stays free: binding it afterwards succeeds immediately
    let probe = std::net::TcpListener::bind("127.0.0.1:9000");
    assert!(probe.is_ok());
}

#[test]
fn udp_endpoint_roundtrip() {
    let server = Endpoint::new("server", "udp", false, "8893").unwrap();
    server.run().unwrap();

    let client = Endpoint::with_host("client", "udp", false, "8893", "127.0.0.1").unwrap();
    client.run().unwrap();

    assert_eq!(client.send(b"ping").unwrap(), 4);
    assert_eq!(server.receive().unwrap(), b"ping");

    // the server learned its peer from the first datagram
    assert_eq!(server.send(b"pong").unwrap(), 4);
    assert_eq!(client.receive().unwrap(), b"pong");

    client.disconnect().unwrap();
    server.disconnect().unwrap();
}

#[test]
fn async_client_sync_receive_is_permitted() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    let feeder = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        std::io::Write::write_all(&mut socket, b"payload").unwrap();
        socket
    });

    let client = Endpoint::with_host("client", "tcp", true, &port, "127.0.0.1").unwrap();
    client.run().unwrap();
    let _socket = feeder.join().unwrap();

    // synchronous receive on an asynchronous endpoint is fine
    assert_eq!(client.receive().unwrap(), b"payload");
    client.disconnect().unwrap();
}
