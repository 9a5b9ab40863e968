#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate byteorder;

use core::fmt;
use core::result;

pub mod proto;

pub type Result<T, E> = result::Result<T, Error<E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<T> {
    UnexpectedEnd,
    Unrecognized,
    Other(T)
}

impl<T: fmt::Display> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Error::UnexpectedEnd =>
                write!(f, "unexpected end of stream"),
            &Error::Unrecognized =>
                write!(f, "unrecognized input"),
            &Error::Other(ref err) =>
                write!(f, "{}", err)
        }
    }
}

impl<T> From<T> for Error<T> {
    fn from(value: T) -> Error<T> {
        Error::Other(value)
    }
}

pub trait Read {
    type ReadError;

    /// Pull some bytes from this source into the specified buffer, returning
    /// how many bytes were read.
    fn read(&mut self, buf: &mut [u8]) -> result::Result<usize, Self::ReadError>;

    /// Read the exact number of bytes required to fill `buf`.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<(), Self::ReadError> {
        while !buf.is_empty() {
            let read_bytes = self.read(buf)?;
            if read_bytes == 0 {
                return Err(Error::UnexpectedEnd)
            }

            buf = &mut { buf }[read_bytes..];
        }

        Ok(())
    }
}

impl<'a, T: Read> Read for &'a mut T {
    type ReadError = T::ReadError;

    fn read(&mut self, buf: &mut [u8]) -> result::Result<usize, Self::ReadError> {
        T::read(self, buf)
    }
}

pub trait Write {
    type WriteError;

    /// Write a buffer into this object, returning how many bytes were written.
    fn write(&mut self, buf: &[u8]) -> result::Result<usize, Self::WriteError>;

    /// Flush this output stream, ensuring that all intermediately buffered
    /// contents reach their destination.
    fn flush(&mut self) -> result::Result<(), Self::WriteError> {
        Ok(())
    }

    /// Attempts to write an entire buffer into `self`.
    fn write_all(&mut self, mut buf: &[u8]) -> Result<(), Self::WriteError> {
        while buf.len() > 0 {
            let written_bytes = self.write(buf)?;
            if written_bytes == 0 {
                return Err(Error::UnexpectedEnd)
            }

            buf = &buf[written_bytes..];
        }

        Ok(())
    }
}

impl<'a, T: Write> Write for &'a mut T {
    type WriteError = T::WriteError;

    fn write(&mut self, buf: &[u8]) -> result::Result<usize, Self::WriteError> {
        T::write(self, buf)
    }

    fn flush(&mut self) -> result::Result<(), Self::WriteError> {
        T::flush(self)
    }
}

#[derive(Debug, Clone)]
pub struct Cursor<T> {
    inner: T,
    pos:   usize
}

impl<T> Cursor<T> {
    pub fn new(inner: T) -> Cursor<T> {
        Cursor { inner, pos: 0 }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos
    }
}

impl<T: AsRef<[u8]>> Read for Cursor<T> {
    type ReadError = core::convert::Infallible;

    fn read(&mut self, buf: &mut [u8]) -> result::Result<usize, Self::ReadError> {
        let data = &self.inner.as_ref()[self.pos..];
        let len = buf.len().min(data.len());
        buf[..len].copy_from_slice(&data[..len]);
        self.pos += len;
        Ok(len)
    }
}

impl<T: AsMut<[u8]>> Write for Cursor<T> {
    type WriteError = core::convert::Infallible;

    fn write(&mut self, buf: &[u8]) -> result::Result<usize, Self::WriteError> {
        let data = &mut self.inner.as_mut()[self.pos..];
        let len  = buf.len().min(data.len());
        data[..len].copy_from_slice(&buf[..len]);
        self.pos += len;
        Ok(len)
    }
}

impl Write for alloc::vec::Vec<u8> {
    type WriteError = core::convert::Infallible;

    fn write(&mut self, buf: &[u8]) -> result::Result<usize, Self::WriteError> {
        self.extend_from_slice(buf);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_read() {
        let mut cursor = Cursor::new(&b"hello"[..]);
        let mut buf = [0; 2];
        assert_eq!(cursor.read(&mut buf), Ok(2));
        assert_eq!(&buf, b"he");
        assert_eq!(cursor.position(), 2);

        let mut rest = [0; 8];
        assert_eq!(cursor.read(&mut rest), Ok(3));
        assert_eq!(&rest[..3], b"llo");
    }

    #[test]
    fn cursor_read_exact_short() {
        let mut cursor = Cursor::new(&b"ab"[..]);
        let mut buf = [0; 4];
        assert_eq!(cursor.read_exact(&mut buf), Err(Error::UnexpectedEnd));
    }

    #[test]
    fn cursor_write() {
        let mut storage = [0; 4];
        {
            let mut cursor = Cursor::new(&mut storage[..]);
            cursor.write_all(b"ab").unwrap();
            cursor.write_all(b"cd").unwrap();
            assert_eq!(cursor.write_all(b"e"), Err(Error::UnexpectedEnd));
        }
        assert_eq!(&storage, b"abcd");
    }

    #[test]
    fn vec_write() {
        let mut out = alloc::vec::Vec::new();
        out.write_all(b"frame").unwrap();
        assert_eq!(&out[..], b"frame");
    }
}
