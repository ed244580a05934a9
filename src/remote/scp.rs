// src/remote/scp.rs
//
// Single-file scp over an already-open exec channel. The peer runs
// `scp -t <path>` for uploads and `scp -f <path>` for downloads.
use std::io::{self, Read, Write};

pub const DEFAULT_MODE: u32 = 0o644;
const MAX_LINE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ScpError {
    #[error("scp protocol violation: {0}")]
    Protocol(String),

    #[error("remote scp reported: {0}")]
    Remote(String),

    #[error("scp stream error: {0}")]
    Io(#[from] io::Error),
}

/// The `C<mode> <size> <name>` control record that precedes file bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl ScpHeader {
    pub fn encode(&self) -> String {
        format!("C{:04o} {} {}\n", self.mode & 0o7777, self.size, self.name)
    }

    pub fn parse(line: &str) -> Result<Self, ScpError> {
        let bad = || ScpError::Protocol(format!("malformed file header {:?}", line));
        let body = line.strip_suffix('\n').unwrap_or(line);
        let rest = body.strip_prefix('C').ok_or_else(bad)?;

        let mut fields = rest.splitn(3, ' ');
        let mode = fields
            .next()
            .filter(|m| m.len() == 4)
            .and_then(|m| u32::from_str_radix(m, 8).ok())
            .ok_or_else(bad)?;
        let size = fields
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(bad)?;
        let name = fields
            .next()
            .filter(|n| !n.is_empty() && !n.contains('/'))
            .ok_or_else(bad)?;

        Ok(Self {
            mode,
            size,
            name: name.to_string(),
        })
    }
}

fn read_byte<S: Read>(stream: &mut S) -> Result<u8, ScpError> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    Ok(byte[0])
}

fn read_line<S: Read>(stream: &mut S) -> Result<String, ScpError> {
    let mut line = Vec::new();
    loop {
        let byte = read_byte(stream)?;
        if byte == b'\n' {
            break;
        }
        line.push(byte);
        if line.len() > MAX_LINE {
            return Err(ScpError::Protocol("control line too long".to_string()));
        }
    }
    String::from_utf8(line).map_err(|_| ScpError::Protocol("control line is not UTF-8".to_string()))
}

/// One status byte: 0 is success, 1 and 2 carry a message line.
fn read_ack<S: Read>(stream: &mut S) -> Result<(), ScpError> {
    match read_byte(stream)? {
        0 => Ok(()),
        1 | 2 => Err(ScpError::Remote(read_line(stream)?)),
        other => Err(ScpError::Protocol(format!(
            "unexpected status byte 0x{:02x}",
            other
        ))),
    }
}

fn ack<S: Write>(stream: &mut S) -> Result<(), ScpError> {
    stream.write_all(&[0])?;
    stream.flush()?;
    Ok(())
}

/// Streams `data` to a peer running in sink (`-t`) mode.
pub fn send_file<S: Read + Write>(
    stream: &mut S,
    name: &str,
    mode: u32,
    data: &[u8],
) -> Result<(), ScpError> {
    read_ack(stream)?;

    let header = ScpHeader {
        mode,
        size: data.len() as u64,
        name: name.to_string(),
    };
    stream.write_all(header.encode().as_bytes())?;
    stream.flush()?;
    read_ack(stream)?;

    stream.write_all(data)?;
    ack(stream)?;
    read_ack(stream)
}

/// Pulls one file from a peer running in source (`-f`) mode.
pub fn receive_file<S: Read + Write>(stream: &mut S) -> Result<(ScpHeader, Vec<u8>), ScpError> {
    ack(stream)?;

    let header = loop {
        match read_byte(stream)? {
            b'C' => break ScpHeader::parse(&format!("C{}", read_line(stream)?))?,
            // Modification times, only sent with -p.
            b'T' => {
                read_line(stream)?;
                ack(stream)?;
            }
            1 | 2 => return Err(ScpError::Remote(read_line(stream)?)),
            other => {
                return Err(ScpError::Protocol(format!(
                    "unexpected record type 0x{:02x}",
                    other
                )))
            }
        }
    };
    ack(stream)?;

    let mut data = Vec::new();
    let read = Read::by_ref(stream).take(header.size).read_to_end(&mut data)?;
    if (read as u64) < header.size {
        return Err(ScpError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", header.size, read),
        )));
    }
    read_ack(stream)?;
    ack(stream)?;

    Ok((header, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays `incoming` as the peer's output and records what we send.
    struct Duplex {
        incoming: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Duplex {
        fn new(incoming: &[u8]) -> Self {
            Self {
                incoming: Cursor::new(incoming.to_vec()),
                sent: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_encoding() {
        let header = ScpHeader {
            mode: 0o600,
            size: 1675,
            name: "ca.key".to_string(),
        };
        assert_eq!(header.encode(), "C0600 1675 ca.key\n");
        assert_eq!(ScpHeader::parse(&header.encode()).unwrap(), header);
    }

    #[test]
    fn rejects_malformed_headers() {
        for line in ["D0755 0 pki\n", "C06x4 5 a\n", "C0644 five a\n", "C0644 5\n", "C0644 5 a/b\n"] {
            assert!(
                matches!(ScpHeader::parse(line), Err(ScpError::Protocol(_))),
                "{line:?}"
            );
        }
    }

    #[test]
    fn send_writes_header_body_and_terminator() {
        let mut stream = Duplex::new(&[0, 0, 0]);
        send_file(&mut stream, "ca.crt", DEFAULT_MODE, b"hello").unwrap();
        assert_eq!(stream.sent, b"C0644 5 ca.crt\nhello\0");
    }

    #[test]
    fn send_surfaces_remote_refusal() {
        let mut incoming = vec![0u8, 1];
        incoming.extend_from_slice(b"scp: /etc/kubernetes/pki/ca.crt: Permission denied\n");
        let mut stream = Duplex::new(&incoming);

        let err = send_file(&mut stream, "ca.crt", DEFAULT_MODE, b"hello").unwrap_err();
        assert!(matches!(err, ScpError::Remote(msg) if msg.ends_with("Permission denied")));
    }

    #[test]
    fn receive_reads_exactly_declared_size() {
        let mut stream = Duplex::new(b"C0600 5 ca.key\nhello\0");
        let (header, data) = receive_file(&mut stream).unwrap();

        assert_eq!(header.mode, 0o600);
        assert_eq!(header.name, "ca.key");
        assert_eq!(data, b"hello");
        assert_eq!(stream.sent, vec![0, 0, 0]);
    }

    #[test]
    fn receive_skips_timestamps() {
        let mut stream = Duplex::new(b"T1700000000 0 1700000000 0\nC0644 2 a\nok\0");
        let (_, data) = receive_file(&mut stream).unwrap();
        assert_eq!(data, b"ok");
        assert_eq!(stream.sent, vec![0, 0, 0, 0]);
    }

    #[test]
    fn receive_reports_missing_file() {
        let mut stream = Duplex::new(b"\x01scp: /etc/ssl/etcd/ssl/ca.pem: No such file or directory\n");
        assert!(matches!(
            receive_file(&mut stream),
            Err(ScpError::Remote(msg)) if msg.contains("No such file")
        ));
    }

    #[test]
    fn receive_detects_truncated_body() {
        let mut stream = Duplex::new(b"C0644 10 a\nshort");
        assert!(matches!(receive_file(&mut stream), Err(ScpError::Io(_))));
    }

    #[test]
    fn receive_rejects_unknown_record() {
        let mut stream = Duplex::new(b"X nonsense\n");
        assert!(matches!(receive_file(&mut stream), Err(ScpError::Protocol(_))));
    }
}
