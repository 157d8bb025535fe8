use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use respio::{Command, RequestReader, RequestWriter};

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// An inspectable sink: what reached the "wire" can be checked while a
/// writer still owns the other clone.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn read_all(input: &[u8]) -> Vec<Vec<String>> {
    let mut reader = RequestReader::new(input);
    let mut cmd = Command::new();
    let mut commands = Vec::new();

    loop {
        match reader.read_cmd(&mut cmd).await {
            Ok(()) => commands.push(cmd_to_vec(&cmd)),
            Err(err) => {
                assert!(err.is_eof(), "expected EOF, got: {err}");
                return commands;
            }
        }
    }
}

fn cmd_to_vec(cmd: &Command) -> Vec<String> {
    let mut parts = vec![cmd.name().to_string()];
    for arg in cmd.args() {
        parts.push(String::from_utf8_lossy(arg).into_owned());
    }
    parts
}

#[tokio::test]
async fn reads_inline_requests() {
    let mut reader = RequestReader::new(&b"PING\r\nEcHO   HeLLO   \r\n"[..]);
    let mut cmd = Command::new();

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "PING");
    assert_eq!(cmd.arg_count(), 0);
    assert!(cmd.arg(0).is_none());

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "EcHO");
    assert_eq!(cmd.arg_count(), 1);
    assert_eq!(cmd.arg(0).unwrap().as_bytes(), b"HeLLO");
    assert!(cmd.arg(1).is_none());

    assert!(reader.read_cmd(&mut cmd).await.unwrap_err().is_eof());
    assert_eq!(cmd.name(), "");
}

#[tokio::test]
async fn reads_multi_bulk_requests() {
    let mut reader =
        RequestReader::new(&b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nEcHO\r\n$5\r\nHeLLO\r\n"[..]);
    let mut cmd = Command::new();

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "PING");
    assert_eq!(cmd.arg_count(), 0);

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "EcHO");
    assert_eq!(cmd.arg_count(), 1);
    assert_eq!(cmd.arg(0).unwrap().as_bytes(), b"HeLLO");

    assert!(reader.read_cmd(&mut cmd).await.unwrap_err().is_eof());
}

// A declared bulk length that disagrees with the payload is not validated;
// the parser reads exactly that many bytes and the unclaimed remainder is
// picked up as the next command, just like deployed Redis.
#[tokio::test]
async fn tolerates_inconsistent_bulk_lengths() {
    let input = b"*1\r\n$4\r\nPING123\r\n*1\r\n$4\r\nPING\r\n";
    assert_eq!(read_all(input).await, vec![vec!["PING"], vec!["3"], vec!["PING"]]);
}

#[tokio::test]
async fn reads_commands_larger_than_the_buffer() {
    let payload = "x".repeat(262_144);
    let input = format!("*2\r\n$4\r\nECHO\r\n$262144\r\n{payload}\r\n");

    let mut reader = RequestReader::new(input.as_bytes());
    let mut cmd = Command::new();

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "ECHO");
    assert_eq!(cmd.arg_count(), 1);
    assert_eq!(cmd.arg(0).unwrap().len(), 262_144);
}

#[tokio::test]
async fn preserves_embedded_crlf_bytes() {
    let input = b"*3\r\n$3\r\nSET\r\n$5\r\nk\r\ney\r\n$5\r\nva\r\nl\r\n";

    let mut reader = RequestReader::new(&input[..]);
    let mut cmd = Command::new();
    reader.read_cmd(&mut cmd).await.unwrap();

    assert_eq!(cmd.name(), "SET");
    assert_eq!(cmd.arg(0).unwrap().as_bytes(), b"k\r\ney");
    assert_eq!(cmd.arg(1).unwrap().as_bytes(), b"va\r\nl");
}

#[tokio::test]
async fn reads_command_fixtures() {
    let fixtures: &[(&[u8], &[&[&str]])] = &[
        (b"PING\r\n", &[&["PING"]]),
        (
            b"  ECHO HELLO  \r\nECHO   WORLD   \r\n",
            &[&["ECHO", "HELLO"], &["ECHO", "WORLD"]],
        ),
        // Empty arrays are a no-op.
        (b"*0\r\nPING\r\n", &[&["PING"]]),
        // A zero-length name still parses.
        (b"*1\r\n$0\r\n\r\n", &[&[""]]),
        (b"*1\r\n$0\r\n", &[&[""]]),
        // The missing trailer eats into the following request.
        (b"*1\r\n$0\r\nPING\r\n", &[&[""], &["NG"]]),
        (b"\r\nPING\r\n\r\nPING\r\n", &[&["PING"], &["PING"]]),
    ];

    for (input, expected) in fixtures {
        let expected: Vec<Vec<String>> = expected
            .iter()
            .map(|cmd| cmd.iter().map(|s| s.to_string()).collect())
            .collect();
        assert_eq!(read_all(input).await, expected, "input {input:?}");
    }
}

#[tokio::test]
async fn reads_get_with_argument() {
    let mut reader = RequestReader::new(&b"*2\r\n$3\r\nGET\r\n$2\r\nXy\r\n"[..]);
    let mut cmd = Command::new();

    reader.read_cmd(&mut cmd).await.unwrap();
    assert_eq!(cmd.name(), "GET");
    assert_eq!(cmd.arg_count(), 1);
    assert_eq!(cmd.arg(0).unwrap().as_bytes(), b"Xy");
}

#[tokio::test]
async fn rejects_malformed_requests() {
    let fixtures: &[(&[u8], &str)] = &[
        (b"*\r\n", "Protocol error: invalid multibulk length"),
        (b"*x\r\n", "Protocol error: invalid multibulk length"),
        (b"*1\r\nPING\r\n", "Protocol error: expected '$', got 'P'"),
        (b"*1\r\n$x\r\n", "Protocol error: invalid bulk length"),
        (b"*1\r\n$-1\r\n", "Protocol error: invalid bulk length"),
    ];

    for (input, expected) in fixtures {
        let mut reader = RequestReader::new(*input);
        let mut cmd = Command::new();
        let err = reader.read_cmd(&mut cmd).await.unwrap_err();
        assert!(err.is_protocol(), "input {input:?}");
        assert_eq!(err.to_string(), *expected, "input {input:?}");
    }
}

#[tokio::test]
async fn peeks_command_names() {
    let fixtures: &[(&[u8], &str)] = &[
        (b"PING\r\n", "PING"),
        (b"  ECHO HELLO  \r\n", "ECHO"),
        (b"*0\r\nPING\r\n", "PING"),
        (b"*1\r\n$4\r\nPING\r\n", "PING"),
    ];

    for (input, expected) in fixtures {
        let mut reader = RequestReader::new(*input);
        assert_eq!(reader.peek_cmd().await.unwrap(), *expected, "input {input:?}");
        // Nothing was consumed.
        let mut cmd = Command::new();
        reader.read_cmd(&mut cmd).await.unwrap();
        assert_eq!(cmd.name(), *expected);
    }
}

// Chunk boundaries must not affect parse results, including boundaries in
// the middle of a bulk payload.
#[tokio::test]
async fn parses_fragmented_streams() {
    let input = b"*2\r\n$3\r\nGET\r\n$2\r\nXy\r\nPING\r\n";

    for chunk_size in [1, 2, 3, 5, 7] {
        let (mut tx, rx) = tokio::io::duplex(chunk_size);
        let feeder = tokio::spawn(async move {
            for chunk in input.chunks(chunk_size) {
                tx.write_all(chunk).await.unwrap();
            }
        });

        let mut reader = RequestReader::new(rx);
        let mut cmd = Command::new();

        reader.read_cmd(&mut cmd).await.unwrap();
        assert_eq!(cmd.name(), "GET", "chunk size {chunk_size}");
        assert_eq!(cmd.arg(0).unwrap().as_bytes(), b"Xy");

        reader.read_cmd(&mut cmd).await.unwrap();
        assert_eq!(cmd.name(), "PING");
        assert_eq!(cmd.arg_count(), 0);

        feeder.await.unwrap();
    }
}

// Refilling a previous command must behave exactly like parsing into a
// fresh one, with no stale state bleeding through.
#[tokio::test]
async fn recycled_commands_match_fresh_ones() {
    let input = b"*3\r\n$4\r\nMSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n*1\r\n$4\r\nPING\r\n";

    let mut reader = RequestReader::new(&input[..]);
    let mut recycled = Command::new();
    reader.read_cmd(&mut recycled).await.unwrap();
    assert_eq!(cmd_to_vec(&recycled), vec!["MSET", "foo", "bar"]);
    reader.read_cmd(&mut recycled).await.unwrap();

    let mut reader = RequestReader::new(&b"*1\r\n$4\r\nPING\r\n"[..]);
    let mut fresh = Command::new();
    reader.read_cmd(&mut fresh).await.unwrap();

    assert_eq!(cmd_to_vec(&recycled), cmd_to_vec(&fresh));
    assert_eq!(recycled.arg_count(), 0);
}

#[tokio::test]
async fn writes_string_commands() {
    let fixtures: &[(&str, &[&str], &[u8])] = &[
        ("PING", &[], b"*1\r\n$4\r\nPING\r\n"),
        ("eCHo", &["heLLo"], b"*2\r\n$4\r\neCHo\r\n$5\r\nheLLo\r\n"),
    ];

    for (cmd, args, expected) in fixtures {
        let sink = SharedSink::default();
        let mut writer = RequestWriter::new(sink.clone());
        writer.write_cmd_str(cmd, args);
        assert_eq!(writer.buffered(), expected.len());
        assert_eq!(sink.len(), 0);

        writer.flush().await.unwrap();
        assert_eq!(writer.buffered(), 0);
        assert_eq!(sink.contents(), *expected);
    }
}

#[tokio::test]
async fn writes_byte_commands() {
    let sink = SharedSink::default();
    let mut writer = RequestWriter::new(sink.clone());
    writer.write_cmd("eCHo", &[b"heLLo"]);
    writer.flush().await.unwrap();
    assert_eq!(sink.contents(), b"*2\r\n$4\r\neCHo\r\n$5\r\nheLLo\r\n");
}

#[tokio::test]
async fn buffers_small_streamed_arguments() {
    let sink = SharedSink::default();
    let mut writer = RequestWriter::new(sink.clone());

    writer.write_array_len(3);
    writer.write_bulk_str("PUT");
    writer.write_bulk_str("key");
    assert_eq!(writer.buffered(), 22);

    let mut src = &b"this is a stream of data"[..];
    writer.write_from(&mut src, 12).await.unwrap();
    assert_eq!(writer.buffered(), 41);
    assert_eq!(sink.len(), 0);

    writer.flush().await.unwrap();
    assert_eq!(writer.buffered(), 0);
    assert_eq!(
        sink.contents(),
        b"*3\r\n$3\r\nPUT\r\n$3\r\nkey\r\n$12\r\nthis is a st\r\n"
    );
}

#[tokio::test]
async fn copies_oversize_streamed_arguments_directly() {
    let payload = vec![b'x'; 100_000];
    let sink = SharedSink::default();
    let mut writer = RequestWriter::new(sink.clone());

    writer.write_array_len(3);
    writer.write_bulk_str("PUT");
    writer.write_bulk_str("key");
    assert_eq!(writer.buffered(), 22);

    let mut src = &payload[..];
    writer.write_from(&mut src, 80_000).await.unwrap();
    // Everything but the trailer went straight to the stream.
    assert_eq!(writer.buffered(), 2);
    assert_eq!(sink.len(), 80_030);

    writer.flush().await.unwrap();
    assert_eq!(sink.len(), 80_032);
}
