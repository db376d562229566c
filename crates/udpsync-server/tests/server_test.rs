/// Integration test: a client talking to a running server over loopback.

use std::fs;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use udpsync_server::{Server, ServerConfig};
use udpsync_transfer::{
    SendAccepted, TransferConfig, TransferContext, UdpLink, bind_udp, negotiate_send,
    request_delete, run_sender,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn start_server(storage_dir: &Path) -> SocketAddr {
    let server = Server::bind(ServerConfig {
        control_addr: "127.0.0.1:0".parse().unwrap(),
        udp_port: 0,
        storage_dir: storage_dir.to_path_buf(),
        transfer: TransferConfig {
            idle_timeout: Some(Duration::from_secs(5)),
            ..TransferConfig::default()
        },
    })
    .unwrap();
    let addr = server.local_addr().unwrap();
    // Detached; the server thread ends with the test process.
    thread::spawn(move || server.serve());
    addr
}

/// The server finishes writing shortly after the sender returns.
fn wait_for_contents(path: &Path, expected: &[u8]) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if fs::read(path).is_ok_and(|data| data == expected) {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("{} never received the expected contents", path.display());
}

fn wait_until_gone(path: &Path) {
    let deadline = Instant::now() + TIMEOUT;
    while path.exists() {
        assert!(Instant::now() < deadline, "{} was not deleted", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}

fn send(control: SocketAddr, path: PathBuf) {
    let name = path.file_name().unwrap().to_str().unwrap().to_string();
    let socket = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
    let local_port = socket.local_addr().unwrap().port();

    let server_port = negotiate_send(control, &name, local_port, TIMEOUT).unwrap();
    let link = UdpLink::connect(socket, SocketAddr::new(control.ip(), server_port)).unwrap();
    run_sender(path, link, TransferConfig::default(), TransferContext::new(name)).unwrap();
}

#[test]
fn file_sent_through_server_is_stored() {
    let storage = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let control = start_server(storage.path());

    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let input = src.path().join("upload.bin");
    fs::write(&input, &data).unwrap();

    send(control, input);
    wait_for_contents(&storage.path().join("upload.bin"), &data);
}

#[test]
fn concurrent_transfers_use_separate_ports() {
    let storage = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let control = start_server(storage.path());

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let input = src.path().join(format!("file{}.txt", i));
            fs::write(&input, format!("contents of file {}", i)).unwrap();
            thread::spawn(move || send(control, input))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..3 {
        wait_for_contents(
            &storage.path().join(format!("file{}.txt", i)),
            format!("contents of file {}", i).as_bytes(),
        );
    }
}

#[test]
fn delete_removes_stored_file() {
    let storage = tempfile::tempdir().unwrap();
    let control = start_server(storage.path());
    let target = storage.path().join("old.txt");
    fs::write(&target, b"stale").unwrap();

    request_delete(control, "old.txt", TIMEOUT).unwrap();
    wait_until_gone(&target);
}

#[test]
fn delete_of_missing_file_keeps_server_running() {
    let storage = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let control = start_server(storage.path());

    request_delete(control, "never-existed.txt", TIMEOUT).unwrap();

    // Still serving afterwards.
    let input = src.path().join("after.txt");
    fs::write(&input, b"still alive").unwrap();
    send(control, input);
    wait_for_contents(&storage.path().join("after.txt"), b"still alive");
}

#[test]
fn request_split_across_writes_is_read_whole() {
    let storage = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let control = start_server(storage.path());

    let input = src.path().join("split.txt");
    fs::write(&input, b"arrived in pieces").unwrap();
    let socket = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
    let local_port = socket.local_addr().unwrap().port();

    let mut stream = TcpStream::connect(control).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
        .write_all(format!("SEND REQUEST # split.txt # {}\r\n", local_port).as_bytes())
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    // The server must still be reading; it replies only after STOP.
    stream.write_all(b"STOP\r\n").unwrap();
    let accepted = SendAccepted::read_from(&mut BufReader::new(&stream)).unwrap();
    drop(stream);

    let link =
        UdpLink::connect(socket, SocketAddr::new(control.ip(), accepted.udp_port)).unwrap();
    run_sender(input, link, TransferConfig::default(), TransferContext::new("split.txt"))
        .unwrap();
    wait_for_contents(&storage.path().join("split.txt"), b"arrived in pieces");
}
