use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use crate::error::{Error, Result};
use crate::observability::metrics::{TICKS_RECEIVED, TICK_DECODE_ERRORS};
use crate::observability::tracing::source_span;
use crate::price_infra::connectors::{ExchangeSource, StreamTask, TaskSlot};
use crate::types::{Exchange, PriceTick};

/// Longest accepted feed line, newline included. Longer lines are dropped.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Reads newline-delimited JSON ticks from a TCP feed.
pub struct TcpSource {
    exchange: Exchange,
    address: String,
    connect_timeout: Duration,
    health_timeout: Duration,
    capacity: usize,
    task: TaskSlot,
}

impl TcpSource {
    pub fn new(
        exchange: Exchange,
        address: impl Into<String>,
        connect_timeout: Duration,
        health_timeout: Duration,
        capacity: usize,
    ) -> Self {
        TcpSource {
            exchange,
            address: address.into(),
            connect_timeout,
            health_timeout,
            capacity: capacity.max(1),
            task: TaskSlot::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, limit: Duration) -> Result<TcpStream> {
        let connection_error = |reason: String| Error::SourceConnection {
            exchange: self.exchange,
            address: self.address.clone(),
            reason,
        };

        timeout(limit, TcpStream::connect(&self.address))
            .await
            .map_err(|_| connection_error(format!("timed out after {:?}", limit)))?
            .map_err(|e| connection_error(e.to_string()))
    }
}

#[async_trait]
impl ExchangeSource for TcpSource {
    fn name(&self) -> &str {
        self.exchange.as_str()
    }

    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<PriceTick>> {
        if self.task.is_active() {
            return Err(Error::AlreadyRunning);
        }

        let stream = self.connect(self.connect_timeout).await?;
        info!(exchange = %self.exchange, address = %self.address, "Connected to exchange feed");

        let (tx, rx) = mpsc::channel(self.capacity);
        let token = cancel.child_token();
        let exchange = self.exchange;

        let reader = read_lines(stream, exchange, tx, token.clone())
            .instrument(source_span(exchange.as_str()));
        self.task.set(StreamTask::new(token, tokio::spawn(reader)));

        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.stop(self.exchange.as_str()).await;
            info!(exchange = %self.exchange, "Closed exchange feed");
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        // Probe with a throwaway connection; the streaming one is untouched.
        let probe = self.connect(self.health_timeout).await?;
        drop(probe);
        Ok(true)
    }
}

enum Line {
    Complete,
    TooLong,
    Eof,
}

/// Reads one line into `line` without buffering more than `MAX_LINE_BYTES`.
/// An oversized line is drained up to its newline and reported as `TooLong`.
async fn read_bounded_line<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(Line::Eof);
    }
    if line.ends_with(b"\n") || (read as u64) < MAX_LINE_BYTES {
        return Ok(Line::Complete);
    }

    loop {
        line.clear();
        let read = (&mut *reader).take(MAX_LINE_BYTES).read_until(b'\n', line).await?;
        if read == 0 || line.ends_with(b"\n") {
            line.clear();
            return Ok(Line::TooLong);
        }
    }
}

async fn read_lines(
    stream: TcpStream,
    exchange: Exchange,
    tx: mpsc::Sender<PriceTick>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();

        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = read_bounded_line(&mut reader, &mut line) => read,
        };

        match read {
            Ok(Line::Eof) => {
                info!("Exchange feed closed by peer");
                break;
            }
            Ok(Line::TooLong) => {
                TICK_DECODE_ERRORS.with_label_values(&[exchange.as_str()]).inc();
                warn!(limit = MAX_LINE_BYTES, "Skipping oversized line");
                continue;
            }
            Ok(Line::Complete) => {}
            Err(e) => {
                warn!(error = %e, "Exchange feed read failed");
                break;
            }
        }

        let payload = line.trim_ascii();
        if payload.is_empty() {
            continue;
        }

        let tick = match PriceTick::from_wire(payload, exchange) {
            Ok(tick) => tick,
            Err(e) => {
                TICK_DECODE_ERRORS.with_label_values(&[exchange.as_str()]).inc();
                warn!(error = %e, "Skipping malformed line");
                continue;
            }
        };
        TICKS_RECEIVED.with_label_values(&[exchange.as_str()]).inc();

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(tick) => {
                if sent.is_err() {
                    debug!("Tick receiver dropped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use crate::types::Symbol;

    fn source_for(address: String) -> TcpSource {
        TcpSource::new(
            Exchange::Exchange1,
            address,
            Duration::from_secs(1),
            Duration::from_secs(1),
            16,
        )
    }

    #[tokio::test]
    async fn test_skips_malformed_lines_and_stamps_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"not json at all\n").await.unwrap();
            socket.write_all(b"\n").await.unwrap();
            socket
                .write_all(b"{\"symbol\":\"BTCUSDT\",\"price\":100000.0,\"timestamp\":1700000000000,\"exchange\":\"somewhere\"}\n")
                .await
                .unwrap();
        });

        let source = source_for(address);
        let mut rx = source.start(CancellationToken::new()).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.exchange, Exchange::Exchange1);
        assert_eq!(tick.symbol, Symbol::BtcUsdt);
        assert_eq!(tick.price, 100000.0);
        assert_eq!(tick.timestamp_ms(), 1_700_000_000_000);

        server.await.unwrap();
        // Peer hung up, so the stream ends.
        assert!(rx.recv().await.is_none());
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped_and_stream_continues() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let flood = vec![b'x'; 3 * MAX_LINE_BYTES as usize];
            socket.write_all(&flood).await.unwrap();
            socket.write_all(b"\n").await.unwrap();
            socket
                .write_all(b"{\"symbol\":\"ETHUSDT\",\"price\":3500.5,\"timestamp\":1700000000000}\n")
                .await
                .unwrap();
        });

        let source = source_for(address);
        let mut rx = source.start(CancellationToken::new()).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.symbol, Symbol::EthUsdt);
        assert_eq!(tick.price, 3500.5);

        server.await.unwrap();
        assert!(rx.recv().await.is_none());
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_bounded_line_reader() {
        let mut input: &[u8] = b"short\nlast";
        let mut line = Vec::new();
        assert!(matches!(read_bounded_line(&mut input, &mut line).await.unwrap(), Line::Complete));
        assert_eq!(line, b"short\n");

        line.clear();
        assert!(matches!(read_bounded_line(&mut input, &mut line).await.unwrap(), Line::Complete));
        assert_eq!(line, b"last");

        line.clear();
        assert!(matches!(read_bounded_line(&mut input, &mut line).await.unwrap(), Line::Eof));

        let mut long = vec![b'y'; MAX_LINE_BYTES as usize];
        long.extend_from_slice(b"\nnext\n");
        let mut input: &[u8] = &long;
        line.clear();
        assert!(matches!(read_bounded_line(&mut input, &mut line).await.unwrap(), Line::TooLong));
        assert!(line.is_empty());
        assert!(matches!(read_bounded_line(&mut input, &mut line).await.unwrap(), Line::Complete));
        assert_eq!(line, b"next\n");
    }

    #[tokio::test]
    async fn test_start_fails_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let source = source_for(address);
        let result = source.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::SourceConnection { .. })));
        assert!(source.health().await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let source = source_for(address);
        let mut rx = source.start(CancellationToken::new()).await.unwrap();
        assert!(source.health().await.is_ok());

        source.close().await.unwrap();
        assert!(rx.recv().await.is_none());
        server.abort();
    }
}
