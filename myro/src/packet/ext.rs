use bytes::{Buf, BufMut, Bytes};

use super::ProtocolError;
use crate::common::ByteStr;

/// Checked reads of wire structures from a packet payload.
///
/// Fixed-width reads go through [`Buf::try_get_u8`] and friends, this
/// trait only adds what `bytes` does not have.
pub trait BytesExt {
    fn try_take(&mut self, n: usize) -> Result<Bytes, ProtocolError>;

    /// Read a length coded binary number.
    ///
    /// `None` is the NULL sentinel (`0xFB`).
    fn get_lcb(&mut self) -> Result<Option<u64>, ProtocolError>;

    /// Read a length coded string, `None` for NULL.
    fn get_lcs(&mut self) -> Result<Option<Bytes>, ProtocolError>;

    /// Read a nul terminated string.
    ///
    /// Using [`ByteStr`] avoids copying out of the payload buffer.
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;
}

/// Wire primitive writes on top of [`BufMut`].
pub trait BufMutExt {
    /// Write a length coded binary number.
    fn put_lcb(&mut self, value: u64);

    /// Write a length coded string.
    fn put_lcs(&mut self, bytes: &[u8]);

    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

const SHORT: ProtocolError = ProtocolError::ShortPacket("payload");

impl BytesExt for Bytes {
    fn try_take(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        if self.remaining() < n {
            return Err(SHORT);
        }
        Ok(self.split_to(n))
    }

    fn get_lcb(&mut self) -> Result<Option<u64>, ProtocolError> {
        let first = self.try_get_u8()?;
        Ok(match first {
            0xFB => None,
            0xFC => Some(self.try_get_u16_le()?.into()),
            0xFD => {
                if self.remaining() < 3 {
                    return Err(SHORT);
                }
                let mut v = [0u8; 4];
                self.copy_to_slice(&mut v[..3]);
                Some(u32::from_le_bytes(v).into())
            }
            0xFE => Some(self.try_get_u64_le()?),
            0xFF => return Err(ProtocolError::UnexpectedPacket { expected: "length", got: 0xFF }),
            n => Some(n.into()),
        })
    }

    fn get_lcs(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.get_lcb()? {
            Some(len) => Ok(Some(self.try_take(len as usize)?)),
            None => Ok(None),
        }
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        let end = self
            .iter()
            .position(|e| matches!(e, b'\0'))
            .ok_or(ProtocolError::ShortPacket("string"))?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(ByteStr::from_utf8_lossy(me))
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_lcb(&mut self, value: u64) {
        match value {
            0..=250 => self.put_u8(value as u8),
            251..=0xFFFF => {
                self.put_u8(0xFC);
                self.put_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.put_u8(0xFD);
                self.put_slice(&value.to_le_bytes()[..3]);
            }
            _ => {
                self.put_u8(0xFE);
                self.put_u64_le(value);
            }
        }
    }

    fn put_lcs(&mut self, bytes: &[u8]) {
        self.put_lcb(bytes.len() as u64);
        self.put_slice(bytes);
    }

    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::BytesMut;

    fn lcb_round(value: u64) -> (usize, u8) {
        let mut buf = BytesMut::new();
        buf.put_lcb(value);
        let len = buf.len();
        let marker = buf[0];
        let mut bytes = buf.freeze();
        assert_eq!(bytes.get_lcb().unwrap(), Some(value));
        assert!(bytes.is_empty());
        (len, marker)
    }

    #[test]
    fn lcb_width_boundaries() {
        assert_eq!(lcb_round(0), (1, 0));
        assert_eq!(lcb_round(250), (1, 250));
        assert_eq!(lcb_round(251), (3, 0xFC));
        assert_eq!(lcb_round(65535), (3, 0xFC));
        assert_eq!(lcb_round(65536), (4, 0xFD));
        assert_eq!(lcb_round(16777215), (4, 0xFD));
        assert_eq!(lcb_round(16777216), (9, 0xFE));
        assert_eq!(lcb_round(u64::MAX), (9, 0xFE));
    }

    #[test]
    fn lcb_null_sentinel() {
        let mut bytes = Bytes::from_static(&[0xFB]);
        assert_eq!(bytes.get_lcb().unwrap(), None);
    }

    #[test]
    fn lcb_truncated_width() {
        // the 0xFC marker promises two more bytes
        let mut bytes = Bytes::from_static(&[0xFC, 1]);
        assert!(matches!(bytes.get_lcb(), Err(ProtocolError::ShortPacket(_))));

        let mut bytes = Bytes::from_static(&[0xFE, 1, 2, 3]);
        assert!(matches!(bytes.get_lcb(), Err(ProtocolError::ShortPacket(_))));
    }

    #[test]
    fn lcb_error_marker_rejected() {
        let mut bytes = Bytes::from_static(&[0xFF, 1, 2]);
        assert!(bytes.get_lcb().is_err());
    }

    #[test]
    fn lcs_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_lcs(b"hello");
        let mut bytes = buf.freeze();
        assert_eq!(bytes.get_lcs().unwrap().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn lcs_null() {
        let mut bytes = Bytes::from_static(&[0xFB]);
        assert_eq!(bytes.get_lcs().unwrap(), None);
    }

    #[test]
    fn lcs_truncated() {
        let mut bytes = Bytes::from_static(&[5, b'h', b'i']);
        assert!(bytes.get_lcs().is_err());
    }

    #[test]
    fn nul_string() {
        let mut bytes = Bytes::from_static(b"5.7.30\0rest");
        assert_eq!(bytes.get_nul_bytestr().unwrap(), "5.7.30");
        assert_eq!(&bytes[..], b"rest");
    }

    #[test]
    fn nul_string_unterminated() {
        let mut bytes = Bytes::from_static(b"no-nul");
        assert!(bytes.get_nul_bytestr().is_err());
    }
}
