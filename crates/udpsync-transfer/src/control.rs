//! Line-oriented control channel over TCP.
//!
//! Every message is a group of CRLF-terminated lines closed by a `STOP`
//! line:
//!
//! ```text
//! client → SEND REQUEST # <file name> # <client udp port>
//!          STOP
//! server → SEND REQUEST OK: receive data with the port:<server udp port>
//!          STOP
//!
//! client → DELETE REQUEST <file name>
//!          STOP
//! ```
//!
//! Readers skip blank and unrecognized lines; end of stream counts as `STOP`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{Result, TransferError};

const SEND_REQUEST: &str = "SEND REQUEST";
const SEND_ACCEPTED: &str = "SEND REQUEST OK: receive data with the port:";
const DELETE_REQUEST: &str = "DELETE REQUEST";
const STOP: &str = "STOP";
const CRLF: &str = "\r\n";

/// A request from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// The client wants to send `file_name` from its UDP port `udp_port`.
    Send { file_name: String, udp_port: u16 },
    /// Remove `file_name` from the server's storage.
    Delete { file_name: String },
}

impl ControlRequest {
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        let line = match self {
            Self::Send {
                file_name,
                udp_port,
            } => format!("{SEND_REQUEST} # {file_name} # {udp_port}"),
            Self::Delete { file_name } => format!("{DELETE_REQUEST} {file_name}"),
        };
        write_message(out, &line)
    }

    /// Read one request, consuming the message through its `STOP` line.
    /// `Ok(None)` when the message ends without a recognizable request line.
    pub fn read_from(input: &mut impl BufRead) -> io::Result<Option<Self>> {
        let mut found = None;
        read_message(input, |line| {
            found = Self::parse_line(line);
            found.is_some()
        })?;
        Ok(found)
    }

    fn parse_line(line: &str) -> Option<Self> {
        // The acceptance line shares the request prefix; never mistake one
        // for the other.
        if line.starts_with(SEND_ACCEPTED) {
            return None;
        }
        if let Some(rest) = line.strip_prefix(SEND_REQUEST) {
            let fields = rest.trim_start().strip_prefix('#')?;
            // The port is after the last separator so names may contain '#'.
            let (name, port) = fields.rsplit_once('#')?;
            let file_name = name.trim();
            let udp_port = port.trim().parse().ok()?;
            if file_name.is_empty() {
                return None;
            }
            return Some(Self::Send {
                file_name: file_name.to_string(),
                udp_port,
            });
        }
        if let Some(rest) = line.strip_prefix(DELETE_REQUEST) {
            let file_name = rest.trim();
            if file_name.is_empty() {
                return None;
            }
            return Some(Self::Delete {
                file_name: file_name.to_string(),
            });
        }
        None
    }
}

/// The server's reply to [`ControlRequest::Send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAccepted {
    /// UDP port the server receives the transfer on.
    pub udp_port: u16,
}

impl SendAccepted {
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        write_message(out, &format!("{SEND_ACCEPTED}{}", self.udp_port))
    }

    /// Read the reply through its `STOP` line; a message without a port line
    /// is a protocol error.
    pub fn read_from(input: &mut impl BufRead) -> Result<Self> {
        let mut udp_port = None;
        read_message(input, |line| {
            udp_port = line
                .strip_prefix(SEND_REQUEST)
                .and_then(|rest| rest.rsplit_once(':'))
                .and_then(|(_, port)| port.trim().parse::<u16>().ok());
            udp_port.is_some()
        })?;
        udp_port
            .map(|udp_port| Self { udp_port })
            .ok_or_else(|| TransferError::ControlProtocol("reply carried no UDP port".into()))
    }
}

/// Send `line` and the closing `STOP` in a single write, so the peer never
/// sees a message cut short by a close.
fn write_message(out: &mut impl Write, line: &str) -> io::Result<()> {
    let message = format!("{line}{CRLF}{STOP}{CRLF}");
    out.write_all(message.as_bytes())?;
    out.flush()
}

/// Feed non-blank lines to `accept` until it returns `true`, then keep
/// reading (and ignoring) lines until a `STOP` line arrives or the stream
/// ends. The whole message is always consumed before the caller replies or
/// closes.
fn read_message(input: &mut impl BufRead, mut accept: impl FnMut(&str) -> bool) -> io::Result<()> {
    let mut line = String::new();
    let mut accepted = false;
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == STOP {
            return Ok(());
        }
        if accepted || trimmed.trim().is_empty() {
            continue;
        }
        if accept(trimmed) {
            accepted = true;
            continue;
        }
        tracing::debug!(line = trimmed, "skipping unrecognized control line");
    }
}

/// Open a control connection with `timeout` applied to connect, read and
/// write.
pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Ask the server at `addr` to receive `file_name` from our UDP `udp_port`.
/// Returns the server's UDP port.
pub fn negotiate_send(
    addr: SocketAddr,
    file_name: &str,
    udp_port: u16,
    timeout: Duration,
) -> Result<u16> {
    let mut stream = connect(addr, timeout)?;
    ControlRequest::Send {
        file_name: file_name.to_string(),
        udp_port,
    }
    .write_to(&mut stream)?;

    let accepted = SendAccepted::read_from(&mut BufReader::new(&stream))?;
    tracing::debug!(
        server = %addr,
        udp_port = accepted.udp_port,
        "send request accepted"
    );
    Ok(accepted.udp_port)
}

/// Ask the server at `addr` to delete `file_name`. No reply is expected.
pub fn request_delete(addr: SocketAddr, file_name: &str, timeout: Duration) -> Result<()> {
    let mut stream = connect(addr, timeout)?;
    ControlRequest::Delete {
        file_name: file_name.to_string(),
    }
    .write_to(&mut stream)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read_request(text: &str) -> Option<ControlRequest> {
        ControlRequest::read_from(&mut Cursor::new(text.as_bytes())).unwrap()
    }

    #[test]
    fn send_request_wire_format() {
        let mut out = Vec::new();
        ControlRequest::Send {
            file_name: "notes.txt".into(),
            udp_port: 15550,
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out, b"SEND REQUEST # notes.txt # 15550\r\nSTOP\r\n");
    }

    #[test]
    fn delete_request_wire_format() {
        let mut out = Vec::new();
        ControlRequest::Delete {
            file_name: "old.bin".into(),
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out, b"DELETE REQUEST old.bin\r\nSTOP\r\n");
    }

    #[test]
    fn accepted_wire_format() {
        let mut out = Vec::new();
        SendAccepted { udp_port: 16667 }.write_to(&mut out).unwrap();
        assert_eq!(
            out,
            b"SEND REQUEST OK: receive data with the port:16667\r\nSTOP\r\n"
        );
    }

    #[test]
    fn parses_send_request_with_noise() {
        let request = read_request("\r\nHELLO\r\nSEND REQUEST # a b.txt # 4000\r\nSTOP\r\n");
        assert_eq!(
            request,
            Some(ControlRequest::Send {
                file_name: "a b.txt".into(),
                udp_port: 4000
            })
        );
    }

    #[test]
    fn file_name_may_contain_separator() {
        let request = read_request("SEND REQUEST # x#y # 1\nSTOP\n");
        assert_eq!(
            request,
            Some(ControlRequest::Send {
                file_name: "x#y".into(),
                udp_port: 1
            })
        );
    }

    #[test]
    fn parses_delete_request() {
        assert_eq!(
            read_request("DELETE REQUEST report final.pdf\nSTOP\n"),
            Some(ControlRequest::Delete {
                file_name: "report final.pdf".into()
            })
        );
    }

    #[test]
    fn malformed_and_missing_requests_yield_nothing() {
        assert_eq!(read_request("SEND REQUEST # f # notaport\nSTOP\n"), None);
        assert_eq!(read_request("DELETE REQUEST   \nSTOP\n"), None);
        assert_eq!(read_request("STOP\nDELETE REQUEST late\n"), None);
        assert_eq!(read_request(""), None);
    }

    #[test]
    fn eof_acts_as_stop() {
        assert_eq!(
            read_request("DELETE REQUEST f"),
            Some(ControlRequest::Delete {
                file_name: "f".into()
            })
        );
    }

    #[test]
    fn accepted_reply_is_parsed() {
        let mut input = Cursor::new(&b"\r\nSEND REQUEST OK: receive data with the port:50123\r\nSTOP\r\n"[..]);
        assert_eq!(
            SendAccepted::read_from(&mut input).unwrap(),
            SendAccepted { udp_port: 50123 }
        );
    }

    /// Counts write calls so a message split over several segments shows up.
    #[derive(Default)]
    struct CountingWriter {
        writes: usize,
        data: Vec<u8>,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn each_message_is_a_single_write() {
        let mut out = CountingWriter::default();
        ControlRequest::Send {
            file_name: "f".into(),
            udp_port: 9,
        }
        .write_to(&mut out)
        .unwrap();
        assert_eq!(out.writes, 1);

        let mut out = CountingWriter::default();
        SendAccepted { udp_port: 9 }.write_to(&mut out).unwrap();
        assert_eq!(out.writes, 1);
        assert!(out.data.ends_with(b"STOP\r\n"));
    }

    #[test]
    fn reading_consumes_through_stop() {
        let mut input = Cursor::new(&b"DELETE REQUEST f\r\nEXTRA\r\nSTOP\r\nNEXT"[..]);
        assert_eq!(
            ControlRequest::read_from(&mut input).unwrap(),
            Some(ControlRequest::Delete {
                file_name: "f".into()
            })
        );
        let mut rest = String::new();
        input.read_line(&mut rest).unwrap();
        assert_eq!(rest, "NEXT");

        let mut input = Cursor::new(
            &b"SEND REQUEST OK: receive data with the port:7\r\nSEND REQUEST OK: receive data with the port:8\r\nSTOP\r\nNEXT"[..],
        );
        assert_eq!(SendAccepted::read_from(&mut input).unwrap().udp_port, 7);
        let mut rest = String::new();
        input.read_line(&mut rest).unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[test]
    fn reply_without_port_is_protocol_error() {
        let mut input = Cursor::new(&b"SOMETHING ELSE\r\nSTOP\r\n"[..]);
        let err = SendAccepted::read_from(&mut input).unwrap_err();
        assert!(matches!(err, TransferError::ControlProtocol(_)));
    }
}
