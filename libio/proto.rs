//! Scalar and length-prefixed codecs shared by every wire format in the
//! runtime. Scalars are little-endian; the one big-endian field on the wire
//! (the frame length) is handled by the frame layer itself.

use alloc::string::{String, FromUtf8Error};
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;

use crate::{Read, Write, Error as IoError};

#[derive(Debug)]
pub enum ReadStringError<T> {
    Utf8(FromUtf8Error),
    Other(T)
}

impl<T: fmt::Display> fmt::Display for ReadStringError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &ReadStringError::Utf8(_) =>
                write!(f, "invalid UTF-8"),
            &ReadStringError::Other(ref err) =>
                write!(f, "{}", err)
        }
    }
}

impl<T> From<ReadStringError<IoError<T>>> for IoError<T> {
    fn from(value: ReadStringError<IoError<T>>) -> IoError<T> {
        match value {
            ReadStringError::Utf8(_) => IoError::Unrecognized,
            ReadStringError::Other(err) => err
        }
    }
}

pub trait ProtoRead {
    type ReadError;

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::ReadError>;

    #[inline]
    fn read_u8(&mut self) -> Result<u8, Self::ReadError> {
        let mut bytes = [0; 1];
        self.read_exact(&mut bytes)?;
        Ok(bytes[0])
    }

    #[inline]
    fn read_u16(&mut self) -> Result<u16, Self::ReadError> {
        let mut bytes = [0; 2];
        self.read_exact(&mut bytes)?;
        Ok(LittleEndian::read_u16(&bytes))
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32, Self::ReadError> {
        let mut bytes = [0; 4];
        self.read_exact(&mut bytes)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    #[inline]
    fn read_u64(&mut self) -> Result<u64, Self::ReadError> {
        let mut bytes = [0; 8];
        self.read_exact(&mut bytes)?;
        Ok(LittleEndian::read_u64(&bytes))
    }

    #[inline]
    fn read_bool(&mut self) -> Result<bool, Self::ReadError> {
        Ok(self.read_u8()? != 0)
    }

    #[inline]
    fn read_bytes(&mut self) -> Result<Vec<u8>, Self::ReadError> {
        let length = self.read_u32()?;
        let mut value = vec![0; length as usize];
        self.read_exact(&mut value)?;
        Ok(value)
    }

    #[inline]
    fn read_string(&mut self) -> Result<String, ReadStringError<Self::ReadError>> {
        let bytes = self.read_bytes().map_err(ReadStringError::Other)?;
        String::from_utf8(bytes).map_err(ReadStringError::Utf8)
    }
}

pub trait ProtoWrite {
    type WriteError;

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::WriteError>;

    #[inline]
    fn write_u8(&mut self, value: u8) -> Result<(), Self::WriteError> {
        self.write_all(&[value])
    }

    #[inline]
    fn write_u16(&mut self, value: u16) -> Result<(), Self::WriteError> {
        let mut bytes = [0; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.write_all(&bytes)
    }

    #[inline]
    fn write_u32(&mut self, value: u32) -> Result<(), Self::WriteError> {
        let mut bytes = [0; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.write_all(&bytes)
    }

    #[inline]
    fn write_u64(&mut self, value: u64) -> Result<(), Self::WriteError> {
        let mut bytes = [0; 8];
        LittleEndian::write_u64(&mut bytes, value);
        self.write_all(&bytes)
    }

    #[inline]
    fn write_bool(&mut self, value: bool) -> Result<(), Self::WriteError> {
        self.write_u8(value as u8)
    }

    #[inline]
    fn write_bytes(&mut self, value: &[u8]) -> Result<(), Self::WriteError> {
        self.write_u32(value.len() as u32)?;
        self.write_all(value)
    }

    #[inline]
    fn write_string(&mut self, value: &str) -> Result<(), Self::WriteError> {
        self.write_bytes(value.as_bytes())
    }
}

impl<T> ProtoRead for T where T: Read + ?Sized {
    type ReadError = IoError<T::ReadError>;

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Self::ReadError> {
        T::read_exact(self, buf)
    }
}

impl<T> ProtoWrite for T where T: Write + ?Sized {
    type WriteError = IoError<T::WriteError>;

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::WriteError> {
        T::write_all(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cursor;

    #[test]
    fn scalar_roundtrip() {
        let mut out = Vec::new();
        out.write_u8(0xa5).unwrap();
        out.write_u16(0x1234).unwrap();
        out.write_u32(0xdeadbeef).unwrap();
        out.write_u64(0x0123_4567_89ab_cdef).unwrap();
        out.write_bool(true).unwrap();

        let mut cursor = Cursor::new(&out[..]);
        assert_eq!(cursor.read_u8().unwrap(), 0xa5);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(cursor.read_u64().unwrap(), 0x0123_4567_89ab_cdef);
        assert_eq!(cursor.read_bool().unwrap(), true);
    }

    #[test]
    fn scalars_are_little_endian() {
        let mut out = Vec::new();
        out.write_u32(0x11223344).unwrap();
        assert_eq!(&out[..], &[0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn string_roundtrip() {
        let mut out = Vec::new();
        out.write_string("mac").unwrap();

        let mut cursor = Cursor::new(&out[..]);
        assert_eq!(cursor.read_string().unwrap(), "mac");
    }

    #[test]
    fn truncated_bytes() {
        let mut out = Vec::new();
        out.write_u32(10).unwrap();
        ProtoWrite::write_all(&mut out, b"short").unwrap();

        let mut cursor = Cursor::new(&out[..]);
        match cursor.read_bytes() {
            Err(IoError::UnexpectedEnd) => (),
            other => panic!("unexpected result: {:?}", other)
        }
    }
}
