//! Live sensor source: newline-delimited sample text.
//!
//! The sensor link (a serial or RFCOMM device node) emits lines such as
//! `21.50,55.20` or `21.50,55.20,63.10`. Each line is parsed at this
//! boundary; malformed lines are dropped with a warning and never reach
//! the hub.
//!
//! Framing never fails on content. Bytes that are not UTF-8 and lines
//! longer than [`MAX_SAMPLE_LINE`] are reported as bad samples, and the
//! stream carries on with the next line.

use std::io;
use std::path::Path;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sensorhub_core::{Reading, Timestamp};
use sensorhub_protocol::{parse_sample, InboundPreview};

use super::SourceError;

/// Longest sample line accepted, excluding the line terminator.
pub const MAX_SAMPLE_LINE: usize = 256;

/// One framed line from the sensor link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleLine {
    Text(String),
    /// The line held bytes that are not UTF-8.
    NotUtf8 { len: usize },
    /// The line exceeded the length cap; its bytes were discarded.
    TooLong { len: usize },
}

/// Splits a byte stream into [`SampleLine`]s with bounded buffering.
#[derive(Debug)]
pub struct SampleLineCodec {
    max_length: usize,
    /// Offset already scanned for a newline.
    next_index: usize,
    /// Bytes skipped so far from an over-long line.
    discarding: Option<usize>,
}

impl SampleLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }
}

impl Default for SampleLineCodec {
    fn default() -> Self {
        Self::new(MAX_SAMPLE_LINE)
    }
}

fn decode_text(raw: &[u8]) -> SampleLine {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(text) => SampleLine::Text(text.to_owned()),
        Err(_) => SampleLine::NotUtf8 { len: raw.len() },
    }
}

impl Decoder for SampleLineCodec {
    type Item = SampleLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<SampleLine>, io::Error> {
        let newline = buf[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| i + self.next_index);

        match (self.discarding, newline) {
            (Some(skipped), Some(at)) => {
                let _ = buf.split_to(at + 1);
                self.discarding = None;
                self.next_index = 0;
                Ok(Some(SampleLine::TooLong { len: skipped + at }))
            }
            (Some(skipped), None) => {
                self.discarding = Some(skipped + buf.len());
                buf.clear();
                self.next_index = 0;
                Ok(None)
            }
            (None, Some(at)) => {
                let line = buf.split_to(at + 1);
                self.next_index = 0;
                if at > self.max_length {
                    return Ok(Some(SampleLine::TooLong { len: at }));
                }
                Ok(Some(decode_text(&line[..at])))
            }
            (None, None) if buf.len() > self.max_length => {
                self.discarding = Some(buf.len());
                buf.clear();
                self.next_index = 0;
                Ok(None)
            }
            (None, None) => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<SampleLine>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if let Some(skipped) = self.discarding.take() {
            return Ok(Some(SampleLine::TooLong { len: skipped }));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        self.next_index = 0;
        Ok(Some(decode_text(&line)))
    }
}

/// Reads sample lines from any async byte stream.
pub struct LineSource<R> {
    name: String,
    reader: R,
}

impl LineSource<File> {
    /// Opens a sensor device node for reading.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Open` if the device cannot be opened. This is
    /// fatal at startup.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        info!(device = %path.display(), "Sensor device opened");
        Ok(Self::new(path.display().to_string(), file))
    }
}

impl<R> LineSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// Starts reading lines.
    ///
    /// Ends on EOF, on a read error (logged), on cancellation, or when the
    /// hub side of `tx` is dropped.
    pub fn spawn(self, tx: mpsc::Sender<Reading>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(tx, cancel))
    }

    async fn run(self, tx: mpsc::Sender<Reading>, cancel: CancellationToken) {
        let Self { name, reader } = self;
        let mut lines = FramedRead::new(reader, SampleLineCodec::default());
        let mut accepted: u64 = 0;
        let mut dropped: u64 = 0;

        info!(source = %name, "Line source started");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(source = %name, "Line source cancelled");
                    break;
                }
                next = lines.next() => next,
            };

            let line = match next {
                Some(Ok(SampleLine::Text(line))) => line,
                Some(Ok(SampleLine::NotUtf8 { len })) => {
                    dropped += 1;
                    warn!(source = %name, len, "Dropping sample with non-UTF-8 bytes");
                    continue;
                }
                Some(Ok(SampleLine::TooLong { len })) => {
                    dropped += 1;
                    warn!(source = %name, len, max = MAX_SAMPLE_LINE, "Dropping over-long sample");
                    continue;
                }
                Some(Err(e)) => {
                    error!(source = %name, error = %e, "Sensor read error");
                    break;
                }
                None => {
                    info!(source = %name, "Sensor stream ended");
                    break;
                }
            };

            let reading = match parse_sample(&line, Timestamp::now()) {
                Ok(reading) => reading,
                Err(e) => {
                    dropped += 1;
                    warn!(
                        source = %name,
                        line = %InboundPreview::new(line.trim_end()),
                        error = %e,
                        "Dropping malformed sample"
                    );
                    continue;
                }
            };

            debug!(source = %name, reading = %reading, "Sample accepted");
            let sent = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(source = %name, "Line source cancelled while hub was busy");
                    break;
                }
                sent = tx.send(reading) => sent,
            };
            if sent.is_err() {
                debug!(source = %name, "Line source stopping: hub channel closed");
                break;
            }
            accepted += 1;
        }

        info!(source = %name, accepted, dropped, "Line source stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn collect(input: &'static [u8]) -> Vec<Reading> {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = LineSource::new("test", input).spawn(tx, CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let mut out = Vec::new();
        while let Ok(reading) = rx.try_recv() {
            out.push(reading);
        }
        out
    }

    fn frames(codec: &mut SampleLineCodec, input: &[u8]) -> Vec<SampleLine> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            out.push(line);
        }
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_forwards_valid_lines_in_order() {
        let readings = collect(b"21.5,55.0\r\n22.0,56.0,70.25\n").await;
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature(), 21.5);
        assert_eq!(readings[1].soil_moisture(), Some(70.25));
    }

    #[tokio::test]
    async fn test_malformed_lines_never_reach_hub() {
        let readings = collect(b"abc,xyz\n21.5\n\n").await;
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_stop_stream() {
        let readings = collect(b"21.5\n23.0,40.0\n").await;
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].humidity(), 40.0);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_dropped_and_stream_continues() {
        let readings = collect(b"21.0,50.0\n\xff\xfe,1\n22.0,51.0\n23.0,52.0\n").await;
        let temps: Vec<f64> = readings.iter().map(|r| r.temperature()).collect();
        assert_eq!(temps, vec![21.0, 22.0, 23.0]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_dropped_and_stream_continues() {
        let mut input = b"21.0,50.0\n".to_vec();
        input.extend(std::iter::repeat(b'9').take(MAX_SAMPLE_LINE * 40));
        input.extend_from_slice(b"\n22.0,51.0\n");
        let input: &'static [u8] = Box::leak(input.into_boxed_slice());

        let readings = collect(input).await;
        let temps: Vec<f64> = readings.iter().map(|r| r.temperature()).collect();
        assert_eq!(temps, vec![21.0, 22.0]);
    }

    #[test]
    fn test_codec_bounds_buffer_while_discarding() {
        let mut codec = SampleLineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"xyz\n1.0,2.0\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(SampleLine::TooLong { len: 19 })
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(SampleLine::Text("1.0,2.0".to_string()))
        );
    }

    #[test]
    fn test_codec_reports_unterminated_tail() {
        let mut codec = SampleLineCodec::new(16);
        assert_eq!(
            frames(&mut codec, b"1.0,2.0\n\xc3\n3.0,4.0"),
            vec![
                SampleLine::Text("1.0,2.0".to_string()),
                SampleLine::NotUtf8 { len: 1 },
                SampleLine::Text("3.0,4.0".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_hub_is_full() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = LineSource::new("test", &b"21.0,50.0\n22.0,51.0\n23.0,52.0\n"[..])
            .spawn(tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let err = LineSource::open("/nonexistent/rfcomm0").await.err().unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
        assert!(err.to_string().contains("/nonexistent/rfcomm0"));
    }
}
