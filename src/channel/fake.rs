//! Scripted in-memory channel
//!
//! Test double for [`ByteChannel`]: reads come from a script of chunks
//! (one chunk per read call), writes are captured, and the eof/close flags
//! are observable from the outside. Used by the SOCKS5 session tests.

use super::{ByteChannel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted channel for tests.
pub struct FakeChannel {
    reads: VecDeque<Vec<u8>>,
    shared: Arc<FakeShared>,
    eof_seen: bool,
}

/// State observable after the channel has been consumed.
#[derive(Default)]
pub struct FakeShared {
    written: Mutex<Vec<u8>>,
    eof_sent: AtomicBool,
    closed: AtomicBool,
}

impl FakeShared {
    /// Everything written to the channel so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Whether `send_eof` was called.
    pub fn eof_sent(&self) -> bool {
        self.eof_sent.load(Ordering::SeqCst)
    }

    /// Whether `close` was called.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FakeChannel {
    /// Build a channel that serves `reads` one chunk per call, then EOF.
    pub fn new<I, B>(reads: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        FakeChannel {
            reads: reads.into_iter().map(Into::into).collect(),
            shared: Arc::new(FakeShared::default()),
            eof_seen: false,
        }
    }

    /// Handle to the captured writes and flags.
    pub fn shared(&self) -> Arc<FakeShared> {
        self.shared.clone()
    }
}

fn pop_chunk(reads: &mut VecDeque<Vec<u8>>, buf: &mut [u8]) -> usize {
    let Some(mut chunk) = reads.pop_front() else {
        return 0;
    };
    let n = chunk.len().min(buf.len());
    buf[..n].copy_from_slice(&chunk[..n]);
    if n < chunk.len() {
        chunk.drain(..n);
        reads.push_front(chunk);
    }
    n
}

#[async_trait]
impl ByteChannel for FakeChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = pop_chunk(&mut self.reads, buf);
        if n == 0 {
            self.eof_seen = true;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.shared.closed() {
            return Err(Error::ChannelClosed);
        }
        self.shared.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.shared.eof_sent.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof_seen
    }

    fn into_split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        let reader = FakeReader { reads: self.reads };
        let writer = FakeWriter {
            shared: self.shared,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct FakeReader {
    reads: VecDeque<Vec<u8>>,
}

#[async_trait]
impl ChannelReader for FakeReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(pop_chunk(&mut self.reads, buf))
    }
}

struct FakeWriter {
    shared: Arc<FakeShared>,
}

#[async_trait]
impl ChannelWriter for FakeWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.shared.closed() {
            return Err(Error::ChannelClosed);
        }
        self.shared.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        self.shared.eof_sent.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reads_then_eof() {
        let mut ch = FakeChannel::new([vec![1u8, 2, 3], vec![4u8]]);
        let mut buf = [0u8; 16];

        assert_eq!(ch.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(ch.read(&mut buf).await.unwrap(), 1);
        assert!(!ch.is_eof());
        assert_eq!(ch.read(&mut buf).await.unwrap(), 0);
        assert!(ch.is_eof());
    }

    #[tokio::test]
    async fn test_short_read_keeps_remainder() {
        let mut ch = FakeChannel::new([vec![1u8, 2, 3, 4, 5]]);
        let mut buf = [0u8; 2];

        assert_eq!(ch.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(ch.read(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [3, 4]);
        assert_eq!(ch.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[tokio::test]
    async fn test_captured_writes_and_flags() {
        let mut ch = FakeChannel::new(Vec::<Vec<u8>>::new());
        let shared = ch.shared();

        ch.write(b"hello ").await.unwrap();
        ch.write(b"world").await.unwrap();
        ch.send_eof().await.unwrap();
        ch.close().await.unwrap();

        assert_eq!(shared.written(), b"hello world");
        assert!(shared.eof_sent());
        assert!(shared.closed());
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let mut ch = FakeChannel::new(Vec::<Vec<u8>>::new());
        ch.close().await.unwrap();
        assert!(matches!(
            ch.write(b"late").await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_split_halves_share_state() {
        let ch = FakeChannel::new([vec![9u8, 9]]);
        let shared = ch.shared();
        let (mut reader, mut writer) = Box::new(ch).into_split();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        writer.write(b"ok").await.unwrap();
        writer.send_eof().await.unwrap();

        assert_eq!(shared.written(), b"ok");
        assert!(shared.eof_sent());
    }
}
