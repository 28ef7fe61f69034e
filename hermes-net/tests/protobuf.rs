//! Protobuf one-shot exchange scenarios over real loopback sockets.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use hermes_net::protobuf;
use prost::Message;

/// The five-field chat message used by the exchange scenarios.
#[derive(Clone, PartialEq, Message)]
struct ChatMessage {
    #[prost(string, tag = "1")]
    name: String,
    #[prost(string, tag = "2")]
    object: String,
    #[prost(string, tag = "3")]
    from: String,
    #[prost(string, tag = "4")]
    to: String,
    #[prost(string, tag = "5")]
    msg: String,
}

fn plain_message() -> ChatMessage {
    ChatMessage {
        name: "name".into(),
        object: "object".into(),
        from: "from".into(),
        to: "to".into(),
        msg: "msg".into(),
    }
}

fn ok_message() -> ChatMessage {
    ChatMessage {
        name: "name: ok".into(),
        object: "object: ok".into(),
        from: "from: ok".into(),
        to: "to: ok".into(),
        msg: "msg: ok".into(),
    }
}

#[test]
fn synchronous_roundtrip() {
    let message = plain_message();
    let serialized_len = message.encode_to_vec().len();

    let receiver = thread::spawn(|| protobuf::receive::<ChatMessage>("8247"));

    thread::sleep(Duration::from_millis(300));
    let sent = {
        let message = message.clone();
        thread::spawn(move || protobuf::send("127.0.0.1", "8247", &message))
    };

    assert_eq!(sent.join().unwrap().unwrap(), serialized_len);

    let received = receiver.join().unwrap().unwrap();
    assert_eq!(received.name, "name");
    assert_eq!(received.object, "object");
    assert_eq!(received.from, "from");
    assert_eq!(received.to, "to");
    assert_eq!(received.msg, "msg");
    assert_eq!(received, message);
}

#[test]
fn asynchronous_roundtrip_with_callbacks() {
    let message = ok_message();
    assert_eq!(message.encode_to_vec().len(), 49);

    let (received_tx, received_rx) = mpsc::channel();
    let receiver = thread::spawn(move || {
        protobuf::async_receive::<ChatMessage, _>("8248", move |response| {
            let _ = received_tx.send(response);
        })
    });

    thread::sleep(Duration::from_millis(300));
    let (sent_tx, sent_rx) = mpsc::channel();
    let sender = {
        let message = message.clone();
        thread::spawn(move || {
            protobuf::async_send(
                "127.0.0.1",
                "8248",
                &message,
                Some(move |bytes| {
                    let _ = sent_tx.send(bytes);
                }),
            )
        })
    };

    sender.join().unwrap().unwrap();
    receiver.join().unwrap().unwrap();

    // callbacks ran on engine workers; assertions happen here
    assert_eq!(sent_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 49);
    let response = received_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(response.name, "name: ok");
    assert_eq!(response.object, "object: ok");
    assert_eq!(response.from, "from: ok");
    assert_eq!(response.to, "to: ok");
    assert_eq!(response.msg, "msg: ok");
}

#[test]
fn send_to_a_silent_port_is_a_connection_error() {
    let message = plain_message();
    // nothing listens on this port
    let result = protobuf::send("127.0.0.1", "8249", &message);
    assert!(matches!(
        result,
        Err(hermes_net::NetworkError::Connection(_))
    ));
}

#[test]
fn oversize_message_is_rejected_by_the_sender() {
    let receiver = thread::spawn(|| protobuf::receive::<ChatMessage>("8250"));
    thread::sleep(Duration::from_millis(300));

    let message = ChatMessage {
        msg: "x".repeat(4096),
        ..plain_message()
    };
    let result = protobuf::send("127.0.0.1", "8250", &message);
    assert!(matches!(
        result,
        Err(hermes_net::NetworkError::MessageSize(_))
    ));

    // nothing was written, so the receiver observes the peer going away
    assert!(matches!(
        receiver.join().unwrap(),
        Err(hermes_net::NetworkError::ClosedConnection)
    ));
}
