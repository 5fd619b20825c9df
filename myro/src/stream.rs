//! Buffered packet transport.
//!
//! Every MySQL packet is a 3-byte little-endian payload length, a one byte
//! sequence number, then the payload. Both sides number packets from zero
//! at the start of each command and bump by one per frame.
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    Result,
    common::verbose,
    error::{ConnectionClosed, TimeoutError},
    mysql::MAX_PACKET_LEN,
    packet::{ProtocolError, ServerError},
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered, sequence checked packet transport over any duplex stream.
#[derive(Debug)]
pub struct PacketStream<S> {
    stream: S,
    read_buf: BytesMut,
    write_buf: BytesMut,
    sequence: u8,
    read_timeout: Option<Duration>,
}

impl<S> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            sequence: 0,
            read_timeout: None,
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Restart packet numbering, done once per client command.
    pub fn reset(&mut self) {
        self.sequence = 0;
    }

    /// Queue one payload for sending.
    ///
    /// Payloads at or above the frame limit are split into continuation
    /// frames, the last of which is shorter than the limit.
    pub fn send(&mut self, payload: &[u8]) {
        let mut rest = payload;
        loop {
            let chunk = rest.len().min(MAX_PACKET_LEN);
            self.write_buf.put_slice(&(chunk as u32).to_le_bytes()[..3]);
            self.write_buf.put_u8(self.sequence);
            self.write_buf.put_slice(&rest[..chunk]);
            self.sequence = self.sequence.wrapping_add(1);
            rest = &rest[chunk..];

            verbose!("send frame len={chunk}");

            // a frame of exactly the limit announces a continuation, so a
            // full-length payload is followed by an empty frame
            if rest.is_empty() && chunk < MAX_PACKET_LEN {
                break;
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketStream<S> {
    /// Write out everything queued by [`send`][PacketStream::send].
    pub async fn flush(&mut self) -> Result<()> {
        self.stream.write_all_buf(&mut self.write_buf).await?;
        Ok(())
    }

    /// Receive one logical payload.
    ///
    /// Continuation frames are reassembled, and an error packet surfaces
    /// as [`ServerError`] instead of being returned.
    pub async fn recv(&mut self) -> Result<Bytes> {
        match self.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.recv_payload()).await {
                Ok(res) => res,
                Err(_elapsed) => Err(TimeoutError.into()),
            },
            None => self.recv_payload().await,
        }
    }

    /// Receive `count` payloads.
    pub async fn recv_many(&mut self, count: usize) -> Result<Vec<Bytes>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.recv().await?);
        }
        Ok(out)
    }

    async fn recv_payload(&mut self) -> Result<Bytes> {
        let mut payload = self.recv_frame().await?;

        if payload.len() == MAX_PACKET_LEN {
            let mut whole = BytesMut::from(&payload[..]);
            loop {
                let next = self.recv_frame().await?;
                let done = next.len() < MAX_PACKET_LEN;
                whole.put_slice(&next);
                if done {
                    break;
                }
            }
            payload = whole.freeze();
        }

        if payload.first() == Some(&0xFF) {
            return Err(ServerError::parse(payload)?.into());
        }

        Ok(payload)
    }

    async fn recv_frame(&mut self) -> Result<Bytes> {
        self.fill(4).await?;
        let len = u32::from_le_bytes([self.read_buf[0], self.read_buf[1], self.read_buf[2], 0]) as usize;
        let seq = self.read_buf[3];

        if seq != self.sequence {
            return Err(ProtocolError::Sequence { expected: self.sequence, got: seq }.into());
        }
        self.sequence = self.sequence.wrapping_add(1);

        verbose!("recv frame len={len} seq={seq}");

        self.fill(4 + len).await?;
        self.read_buf.advance(4);
        Ok(self.read_buf.split_to(len).freeze())
    }

    async fn fill(&mut self, n: usize) -> Result<()> {
        if self.read_buf.len() < n {
            self.read_buf.reserve(n - self.read_buf.len());
        }
        while self.read_buf.len() < n {
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ConnectionClosed.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    fn frames(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            let len = u32::from_le_bytes([rest[0], rest[1], rest[2], 0]) as usize;
            let seq = rest[3];
            out.push((seq, rest[4..4 + len].to_vec()));
            rest = &rest[4 + len..];
        }
        out
    }

    #[test]
    fn send_frames_and_numbers() {
        let mut stream = PacketStream::new(());
        stream.send(&[3, b'S', b'Q', b'L']);
        stream.send(&[1]);

        let got = frames(&stream.write_buf);
        assert_eq!(got, [(0, vec![3, b'S', b'Q', b'L']), (1, vec![1])]);
    }

    #[test]
    fn send_empty_payload() {
        let mut stream = PacketStream::new(());
        stream.send(&[]);
        assert_eq!(&stream.write_buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn reset_restarts_numbering() {
        let mut stream = PacketStream::new(());
        stream.send(&[1]);
        stream.send(&[2]);
        stream.reset();
        stream.send(&[3]);

        let got = frames(&stream.write_buf);
        assert_eq!(got[0].0, 0);
        assert_eq!(got[1].0, 1);
        assert_eq!(got[2].0, 0);
    }

    #[test]
    fn send_splits_oversized_payload() {
        let payload = vec![7u8; MAX_PACKET_LEN + 2];
        let mut stream = PacketStream::new(());
        stream.send(&payload);

        let got = frames(&stream.write_buf);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].1.len(), MAX_PACKET_LEN);
        assert_eq!(got[1], (1, vec![7u8, 7]));
    }

    #[test]
    fn send_full_frame_appends_empty_frame() {
        let payload = vec![7u8; MAX_PACKET_LEN];
        let mut stream = PacketStream::new(());
        stream.send(&payload);

        let got = frames(&stream.write_buf);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].1.len(), MAX_PACKET_LEN);
        assert_eq!(got[1], (1, vec![]));
    }

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes()[..3].to_vec();
        out.push(seq);
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn recv_single_payload() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = PacketStream::new(client);

        tokio::io::AsyncWriteExt::write_all(&mut server, &frame(0, &[0, 0, 0, 2, 0, 0, 0]))
            .await
            .unwrap();

        let payload = stream.recv().await.unwrap();
        assert_eq!(&payload[..], &[0, 0, 0, 2, 0, 0, 0]);
    }

    #[tokio::test]
    async fn recv_reassembles_continuation() {
        let (client, mut server) = tokio::io::duplex(MAX_PACKET_LEN * 2);
        let mut stream = PacketStream::new(client);

        let mut script = frame(0, &vec![9u8; MAX_PACKET_LEN]);
        script.extend(frame(1, &[9, 9]));
        tokio::io::AsyncWriteExt::write_all(&mut server, &script).await.unwrap();

        let payload = stream.recv().await.unwrap();
        assert_eq!(payload.len(), MAX_PACKET_LEN + 2);
    }

    #[tokio::test]
    async fn recv_surfaces_server_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = PacketStream::new(client);

        let mut payload = vec![0xFF, 0x28, 0x04];
        payload.extend_from_slice(b"#42000");
        payload.extend_from_slice(b"syntax error");
        tokio::io::AsyncWriteExt::write_all(&mut server, &frame(0, &payload)).await.unwrap();

        let err = stream.recv().await.unwrap_err();
        match err.kind() {
            ErrorKind::Server(e) => {
                assert_eq!(e.code, 1064);
                assert_eq!(e.sql_state.as_ref().unwrap(), "42000");
            }
            other => panic!("{other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_rejects_bad_sequence() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut stream = PacketStream::new(client);

        tokio::io::AsyncWriteExt::write_all(&mut server, &frame(3, &[0]))
            .await
            .unwrap();

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::Sequence { expected: 0, got: 3 })));
        // the counter is left untouched for diagnostics
        assert_eq!(stream.sequence, 0);
    }

    #[tokio::test]
    async fn recv_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut stream = PacketStream::new(client);
        stream.set_read_timeout(Some(Duration::from_millis(20)));

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Timeout(_)));
    }

    #[tokio::test]
    async fn recv_closed_stream() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let mut stream = PacketStream::new(client);

        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Closed(_)));
    }
}
