use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use voxwire::net::FrameAssembler;
use voxwire_cli::{run, serve_mirror, CommandKind, CommonOptions};

fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

fn options_for(port: u16) -> CommonOptions {
    CommonOptions {
        port,
        timeout_ms: 3_000,
        retry_ms: 10,
        ..CommonOptions::default()
    }
}

fn read_frames(stream: &mut TcpStream, wanted: usize) -> Vec<String> {
    let mut assembler = FrameAssembler::new();
    let mut frames = Vec::new();
    let mut chunk = [0u8; 1024];
    while frames.len() < wanted {
        let bytes_read = stream.read(&mut chunk).expect("read");
        if bytes_read == 0 {
            break;
        }
        assembler
            .push(&chunk[..bytes_read], &mut frames)
            .expect("frame");
    }
    frames
}

#[test]
fn send_prints_every_response_frame() {
    let (listener, port) = local_listener();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let received = read_frames(&mut stream, 1);
        stream
            .write_all(b"{\"ok\":true,\"message\":\"placed block 1\"}\0{\"ok\":false,\"message\":\"no handler for block type 'nope'\"}\0")
            .expect("write");
        thread::sleep(Duration::from_millis(400));
        received
    });

    let mut stdout = Vec::new();
    run(
        CommandKind::Send {
            action: "place".to_string(),
            items: r#"[{"id":1,"blockType":"block","position":[0,0,0]}]"#.to_string(),
        },
        options_for(port),
        &mut stdout,
    )
    .expect("send");

    let received = server.join().expect("server thread");
    assert_eq!(
        received,
        vec![r#"{"action":"place","data":[{"blockType":"block","id":1,"position":[0,0,0]}]}"#
            .to_string()]
    );
    let printed = String::from_utf8(stdout).expect("utf8");
    let lines: Vec<&str> = printed.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("placed block 1"));
    assert!(lines[1].contains("\"ok\":false"));
}

#[test]
fn script_file_sends_one_frame_per_line() {
    let mut script = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        script,
        "# two frames\nplace [{{\"id\":4,\"blockType\":\"wire\",\"position\":[0,0,0]}}]\n\n{{\"action\":\"remove\",\"data\":[{{\"id\":4}}]}}"
    )
    .expect("write script");

    let (listener, port) = local_listener();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        let mut chunk = [0u8; 1024];
        let mut acked = 0usize;
        while acked < 2 {
            let bytes_read = stream.read(&mut chunk).expect("read");
            if bytes_read == 0 {
                break;
            }
            assembler
                .push(&chunk[..bytes_read], &mut frames)
                .expect("frame");
            while acked < frames.len() {
                acked += 1;
                let reply = format!("{{\"ok\":true,\"message\":\"ack {acked}\"}}\0");
                stream.write_all(reply.as_bytes()).expect("reply");
            }
        }
        thread::sleep(Duration::from_millis(400));
        frames
    });

    let mut stdout = Vec::new();
    run(
        CommandKind::Script {
            path: script.path().to_string_lossy().into_owned(),
        },
        options_for(port),
        &mut stdout,
    )
    .expect("script");

    let frames = server.join().expect("server thread");
    assert_eq!(frames.len(), 2);
    assert!(frames[0].starts_with(r#"{"action":"place""#));
    assert_eq!(frames[1], r#"{"action":"remove","data":[{"id":4}]}"#);

    let printed = String::from_utf8(stdout).expect("utf8");
    assert!(printed.contains("ack 1"));
    assert!(printed.contains("ack 2"));
}

#[test]
fn bad_script_line_fails_before_connecting() {
    let mut script = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(script, "remove [{{\"id\":1}}]\nplace [{{").expect("write script");

    let mut stdout = Vec::new();
    let error = run(
        CommandKind::Script {
            path: script.path().to_string_lossy().into_owned(),
        },
        options_for(1),
        &mut stdout,
    )
    .expect_err("invalid script");

    assert!(error.starts_with("script line 2:"));
    assert!(stdout.is_empty());
}

#[test]
fn mirror_echoes_actions_but_not_responses() {
    let (listener, port) = local_listener();
    let mirror = thread::spawn(move || {
        let mut output = Vec::new();
        serve_mirror(&listener, &mut output).expect("mirror");
        String::from_utf8(output).expect("utf8")
    });

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client
        .set_read_timeout(Some(Duration::from_secs(3)))
        .expect("read timeout");
    client
        .write_all(b"{\"ok\":true,\"message\":\"placed block 1\"}\0{\"action\":\"remove\",\"data\":[{\"id\":1}]}\0")
        .expect("write");

    let echoed = read_frames(&mut client, 1);
    assert_eq!(echoed, vec![r#"{"action":"remove","data":[{"id":1}]}"#.to_string()]);
    drop(client);

    let printed = mirror.join().expect("mirror thread");
    assert!(printed.contains("peer connected"));
    assert!(printed.contains(r#"{"ok":true,"message":"placed block 1"}"#));
    assert!(printed.contains(r#"{"action":"remove","data":[{"id":1}]}"#));
    assert!(printed.contains("peer disconnected"));
}

#[test]
fn unreachable_peer_times_out() {
    let (listener, port) = local_listener();
    drop(listener);

    let mut stdout = Vec::new();
    let error = run(
        CommandKind::Send {
            action: "remove".to_string(),
            items: "[]".to_string(),
        },
        CommonOptions {
            timeout_ms: 300,
            ..options_for(port)
        },
        &mut stdout,
    )
    .expect_err("no peer");
    assert!(error.starts_with("timed out connecting"));
}
