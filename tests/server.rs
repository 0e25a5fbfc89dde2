//! The accept-loop server: per-connection threads, diagnostics channel,
//! stop handle and plain-HTTP fallback.

use std::{
    io::{Read, Write},
    net::TcpStream,
    thread::spawn,
    time::Duration,
};

use wscore::{
    error::CapacityError,
    server::{Server, ServerConfig},
    Error, Message,
};

#[test]
fn serve_echo_and_stop() {
    env_logger::try_init().ok();
    let server = Server::bind("127.0.0.1:0").unwrap();
    let port = server.local_addr().unwrap().port();
    let stop = server.stop_handle();

    let server_thread = spawn(move || {
        server.serve(|socket| {
            loop {
                match socket.read() {
                    Ok(Message::Close(_)) => continue,
                    Ok(message) => socket.send(message)?,
                    Err(Error::ConnectionClosed) => return Ok(()),
                    Err(err) => return Err(err),
                }
            }
        })
    });

    for round in 0..3 {
        let (mut client, _) =
            wscore::connect(format!("ws://127.0.0.1:{port}/").parse().unwrap()).unwrap();
        let body = format!("round {round}");
        client.send(Message::text(body.clone())).unwrap();
        assert_eq!(client.read().unwrap(), Message::text(body));
        client.close(None).unwrap();
        loop {
            match client.read() {
                Ok(_) => continue,
                Err(Error::ConnectionClosed) => break,
                Err(err) => panic!("unexpected error: {err:?}"),
            }
        }
    }

    stop.stop();
    server_thread.join().unwrap().unwrap();
}

#[test]
fn handler_errors_reach_the_diagnostics_channel() {
    env_logger::try_init().ok();
    // A short read timeout keeps the post-handler close drain from stalling
    // on a client that never answers.
    let mut config = ServerConfig::default();
    config.read_timeout = Some(Duration::from_millis(100));
    let mut server = Server::bind_with_config("127.0.0.1:0", config).unwrap();
    let port = server.local_addr().unwrap().port();
    let stop = server.stop_handle();
    let diagnostics = server.diagnostics().unwrap();

    let server_thread = spawn(move || {
        server.serve(|socket| {
            let _ = socket.read()?;
            // A policy rejection: the message was too big for this handler.
            Err(Error::Capacity(CapacityError::MessageTooLong { size: 1, max_size: 0 }))
        })
    });

    let (mut client, _) =
        wscore::connect(format!("ws://127.0.0.1:{port}/").parse().unwrap()).unwrap();
    client.send(Message::text("hi")).unwrap();

    // The handler error is published out-of-band; the accept loop survives.
    let err = diagnostics.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(err, Error::Capacity(CapacityError::MessageTooLong { .. })));

    // The server still accepts new connections afterwards.
    let (_client2, response) =
        wscore::connect(format!("ws://127.0.0.1:{port}/").parse().unwrap()).unwrap();
    assert_eq!(response.status(), http::StatusCode::SWITCHING_PROTOCOLS);

    stop.stop();
    server_thread.join().unwrap().unwrap();
}

#[test]
fn non_upgrade_requests_hit_the_fallback() {
    env_logger::try_init().ok();
    let mut server = Server::bind_with_config("127.0.0.1:0", ServerConfig::default()).unwrap();
    let port = server.local_addr().unwrap().port();
    let stop = server.stop_handle();

    server.set_fallback(|request, mut stream| {
        assert_eq!(request.uri().path(), "/health");
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
    });

    let server_thread = spawn(move || server.serve(|_socket| Ok(())));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("ok"));

    stop.stop();
    server_thread.join().unwrap().unwrap();
}
