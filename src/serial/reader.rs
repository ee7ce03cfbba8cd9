//! Line-oriented reader over a serial byte stream
//!
//! Reads `\n`-terminated UTF-8 frames with an inactivity timeout. The reader
//! is generic over any [`AsyncRead`] so the same framing logic runs against
//! a real `tokio_serial::SerialStream` and in-memory streams in tests.

use super::SerialError;
use crate::config::SerialSection;
use crate::protocol::RawLine;
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info};

/// Source of raw serial lines consumed by the bridge
#[async_trait]
pub trait LineSource: Send + 'static {
    /// Next complete line.
    ///
    /// `Ok(None)` means the read timed out with no complete line; the caller
    /// simply asks again.
    async fn next_line(&mut self) -> Result<Option<RawLine>, SerialError>;
}

/// Serial reader owning exclusive access to one device handle
pub struct SerialReader<R> {
    reader: BufReader<R>,
    read_timeout: Duration,
    max_line_length: usize,
    /// Bytes of a line whose terminator has not arrived yet
    partial: Vec<u8>,
    /// Skipping the rest of an over-long line
    discarding: bool,
    eof: bool,
}

impl SerialReader<SerialStream> {
    /// Open the configured serial device
    pub fn open(config: &SerialSection) -> Result<Self, SerialError> {
        let builder = tokio_serial::new(&config.device, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .parity(parity(&config.parity))
            .stop_bits(stop_bits(config.stop_bits))
            .timeout(config.read_timeout());

        let stream = SerialStream::open(&builder).map_err(|e| SerialError::Open {
            device: config.device.clone(),
            reason: e.to_string(),
        })?;

        info!(
            device = %config.device,
            baud_rate = config.baud_rate,
            "Opened serial device"
        );

        Ok(Self::new(stream, config.read_timeout(), config.max_line_length))
    }
}

impl<R> SerialReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, read_timeout: Duration, max_line_length: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            read_timeout,
            max_line_length,
            partial: Vec::new(),
            discarding: false,
            eof: false,
        }
    }

    /// Read the next line, waiting at most the configured read timeout
    pub async fn read_line(&mut self) -> Result<Option<RawLine>, SerialError> {
        if self.eof {
            return Err(SerialError::DeviceClosed);
        }

        match tokio::time::timeout(self.read_timeout, self.fill_line()).await {
            Ok(result) => result,
            // Partial bytes stay buffered for the next call
            Err(_) => Ok(None),
        }
    }

    async fn fill_line(&mut self) -> Result<Option<RawLine>, SerialError> {
        loop {
            // Room for a full-length line plus its CR LF terminator
            let budget = (self.max_line_length + 2).saturating_sub(self.partial.len()) as u64;
            let read = (&mut self.reader)
                .take(budget.max(1))
                .read_until(b'\n', &mut self.partial)
                .await;

            let n = match read {
                Ok(n) => n,
                Err(e) => match classify_io_error(&e) {
                    IoErrorClass::Retry => continue,
                    IoErrorClass::Idle => return Ok(None),
                    IoErrorClass::Closed => {
                        self.eof = true;
                        return Err(SerialError::DeviceClosed);
                    }
                    IoErrorClass::Failure => return Err(SerialError::ReadFailure(e)),
                },
            };

            let terminated = self.partial.last() == Some(&b'\n');

            if n == 0 && !terminated {
                self.eof = true;
                if self.partial.is_empty() || self.discarding {
                    self.partial.clear();
                    return Err(SerialError::DeviceClosed);
                }
                // Final unterminated line, reported before the close
                let bytes = std::mem::take(&mut self.partial);
                return self.decode(bytes).map(Some);
            }

            if self.discarding {
                self.partial.clear();
                if terminated {
                    self.discarding = false;
                }
                continue;
            }

            if !terminated {
                // A trailing CR may still be followed by its LF
                let content = self.partial.strip_suffix(b"\r").unwrap_or(&self.partial[..]);
                if content.len() > self.max_line_length {
                    let bytes = std::mem::take(&mut self.partial);
                    self.discarding = true;
                    return Err(self.overlong(&bytes));
                }
                continue;
            }

            let mut bytes = std::mem::take(&mut self.partial);
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            if bytes.len() > self.max_line_length {
                return Err(self.overlong(&bytes));
            }
            return self.decode(bytes).map(Some);
        }
    }

    fn overlong(&self, bytes: &[u8]) -> SerialError {
        SerialError::Malformed {
            raw: String::from_utf8_lossy(&bytes[..32.min(bytes.len())]).into_owned(),
            reason: format!("line exceeds {} bytes", self.max_line_length),
        }
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<RawLine, SerialError> {
        String::from_utf8(bytes)
            .map(RawLine::from)
            .map_err(|e| {
                let raw = String::from_utf8_lossy(e.as_bytes()).into_owned();
                debug!(raw = %raw, "Serial line is not valid UTF-8");
                SerialError::Malformed {
                    raw,
                    reason: e.utf8_error().to_string(),
                }
            })
    }
}

#[async_trait]
impl<R> LineSource for SerialReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_line(&mut self) -> Result<Option<RawLine>, SerialError> {
        self.read_line().await
    }
}

enum IoErrorClass {
    Retry,
    Idle,
    Closed,
    Failure,
}

fn classify_io_error(error: &io::Error) -> IoErrorClass {
    match error.kind() {
        io::ErrorKind::Interrupted => IoErrorClass::Retry,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => IoErrorClass::Idle,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => IoErrorClass::Closed,
        _ => IoErrorClass::Failure,
    }
}

fn parity(name: &str) -> Parity {
    match name.to_lowercase().as_str() {
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => Parity::None,
    }
}

fn stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

fn data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn reader_over(mock: tokio_test::io::Mock) -> SerialReader<tokio_test::io::Mock> {
        SerialReader::new(mock, TIMEOUT, 64)
    }

    #[tokio::test]
    async fn test_reads_crlf_terminated_lines() {
        let mock = Builder::new().read(b"21.5:19.2\r\n22.0:19.4\n").build();
        let mut reader = reader_over(mock);

        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("21.5:19.2")));
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("22.0:19.4")));
        assert!(matches!(
            reader.read_line().await,
            Err(SerialError::DeviceClosed)
        ));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mock = Builder::new().read(b"21.").read(b"5:19").read(b".2\n").build();
        let mut reader = reader_over(mock);

        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("21.5:19.2")));
    }

    #[tokio::test]
    async fn test_timeout_returns_none_and_keeps_partial() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = SerialReader::new(host, TIMEOUT, 64);

        device.write_all(b"21.5:").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), None);

        device.write_all(b"19.2\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("21.5:19.2")));
    }

    #[tokio::test]
    async fn test_idle_device_times_out() {
        let (_device, host) = tokio::io::duplex(64);
        let mut reader = SerialReader::new(host, TIMEOUT, 64);

        assert_eq!(reader.read_line().await.unwrap(), None);
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed_and_reader_continues() {
        let mock = Builder::new().read(b"\xff\xfe:1\nok:2\n").build();
        let mut reader = reader_over(mock);

        assert!(matches!(
            reader.read_line().await,
            Err(SerialError::Malformed { .. })
        ));
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("ok:2")));
    }

    #[tokio::test]
    async fn test_overlong_line_is_discarded_up_to_newline() {
        let mut input = vec![b'9'; 100];
        input.extend_from_slice(b"\n1:2\n");
        let mock = Builder::new().read(&input).build();
        let mut reader = SerialReader::new(mock, TIMEOUT, 16);

        match reader.read_line().await {
            Err(SerialError::Malformed { reason, .. }) => assert!(reason.contains("16")),
            other => panic!("expected malformed line, got {other:?}"),
        }
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("1:2")));
    }

    #[tokio::test]
    async fn test_full_length_line_accepted_with_either_terminator() {
        let line = "1".repeat(16);
        let input = format!("{line}\r\n{line}\n");
        let mock = Builder::new().read(input.as_bytes()).build();
        let mut reader = SerialReader::new(mock, TIMEOUT, 16);

        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from(line.as_str())));
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from(line.as_str())));
    }

    #[tokio::test]
    async fn test_full_length_line_with_crlf_split_between_reads() {
        let line = "2".repeat(16);
        let mock = Builder::new()
            .read(format!("{line}\r").as_bytes())
            .read(b"\n3:4\n")
            .build();
        let mut reader = SerialReader::new(mock, TIMEOUT, 16);

        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from(line.as_str())));
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("3:4")));
    }

    #[tokio::test]
    async fn test_one_byte_over_limit_is_malformed() {
        let over = "5".repeat(17);
        let input = format!("{over}\n{over}\r\n1:2\n");
        let mock = Builder::new().read(input.as_bytes()).build();
        let mut reader = SerialReader::new(mock, TIMEOUT, 16);

        for _ in 0..2 {
            assert!(matches!(
                reader.read_line().await,
                Err(SerialError::Malformed { .. })
            ));
        }
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("1:2")));
    }

    #[tokio::test]
    async fn test_unterminated_final_line_then_closed() {
        let mock = Builder::new().read(b"1:2").build();
        let mut reader = reader_over(mock);

        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("1:2")));
        assert!(matches!(
            reader.read_line().await,
            Err(SerialError::DeviceClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_read_failure() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::Other, "framing error"))
            .read(b"1:2\n")
            .build();
        let mut reader = reader_over(mock);

        assert!(matches!(
            reader.read_line().await,
            Err(SerialError::ReadFailure(_))
        ));
        assert_eq!(reader.read_line().await.unwrap(), Some(RawLine::from("1:2")));
    }

    #[tokio::test]
    async fn test_broken_pipe_is_device_closed() {
        let mock = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let mut reader = reader_over(mock);

        assert!(matches!(
            reader.read_line().await,
            Err(SerialError::DeviceClosed)
        ));
    }

    #[test]
    fn test_line_settings_mapping() {
        assert_eq!(parity("EVEN"), Parity::Even);
        assert_eq!(parity("odd"), Parity::Odd);
        assert_eq!(parity("none"), Parity::None);
        assert_eq!(stop_bits(2), StopBits::Two);
        assert_eq!(stop_bits(1), StopBits::One);
        assert_eq!(data_bits(7), DataBits::Seven);
        assert_eq!(data_bits(8), DataBits::Eight);
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let config = SerialSection {
            device: "/dev/ripple-does-not-exist".to_string(),
            ..SerialSection::default()
        };
        assert!(matches!(
            SerialReader::open(&config),
            Err(SerialError::Open { .. })
        ));
    }
}
