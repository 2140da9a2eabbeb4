use std::io::{self, Read};

use byteorder::{ByteOrder, NativeEndian};

use crate::error::Error;
use crate::stream::RewindRead;

pub const RING_BYTES: usize = 32768;
pub const SEGMENTS: usize = 4;
pub const SEG_BYTES: usize = RING_BYTES / SEGMENTS;

/// Random-access peeks over a forward-only byte stream, backed by a fixed
/// ring of `SEGMENTS` equally sized segments.
///
/// The framer needs to look at length fields anywhere inside the next token
/// before anything is consumed, and the stream itself (a gzip decoder) only
/// moves forward. Segments are refilled from the stream on demand, one at a
/// time, as peeks reach into them; consumption just advances the head
/// cursor. A single token must fit inside the ring, so a peek can never
/// need a byte that a refill has already overwritten.
pub struct RingReader<R> {
    src: R,
    buf: Box<[u8; RING_BYTES]>,
    /// Absolute stream offset of the next byte to consume.
    head: u64,
    /// Absolute count of bytes refilled from the stream so far.
    filled: u64,
    eof: bool,
}

impl<R: RewindRead> RingReader<R> {
    pub fn new(src: R) -> Self {
        RingReader {
            src,
            buf: Box::new([0; RING_BYTES]),
            head: 0,
            filled: 0,
            eof: false,
        }
    }

    /// Absolute offset of the current head, i.e. of the token being framed.
    pub fn position(&self) -> u64 {
        self.head
    }

    /// True once the stream has run dry and everything refilled from it has
    /// been consumed.
    pub fn at_eof(&self) -> bool {
        self.eof && self.head >= self.filled
    }

    /// Returns the byte at the head, or `None` if the head sits exactly at
    /// the end of the stream. This is the clean-termination signal for the
    /// framing loop; running out of input anywhere else inside a token is an
    /// error.
    pub fn peek_head(&mut self) -> Result<Option<u8>, Error> {
        if !self.ensure(self.head)? {
            return Ok(None);
        }
        Ok(Some(self.byte_at(self.head)))
    }

    pub fn peek_u8(&mut self, delta: usize) -> Result<u8, Error> {
        let abs = self.head + delta as u64;
        if !self.ensure(abs)? {
            return Err(Error::TruncatedToken { offset: self.head });
        }
        Ok(self.byte_at(abs))
    }

    /// 16-bit peek in host byte order, matching how the on-disk fields are
    /// produced on the platform writing the trail.
    pub fn peek_u16(&mut self, delta: usize) -> Result<u16, Error> {
        let mut raw = [0u8; 2];
        self.peek_into(delta, &mut raw)?;
        Ok(NativeEndian::read_u16(&raw))
    }

    /// 32-bit peek in host byte order.
    pub fn peek_u32(&mut self, delta: usize) -> Result<u32, Error> {
        let mut raw = [0u8; 4];
        self.peek_into(delta, &mut raw)?;
        Ok(NativeEndian::read_u32(&raw))
    }

    /// Copies the next `out.len()` bytes into `out` and advances the head
    /// past them.
    pub fn consume_into(&mut self, out: &mut [u8]) -> Result<(), Error> {
        self.peek_into(0, out)?;
        self.head += out.len() as u64;
        Ok(())
    }

    /// Rewinds the underlying stream and forgets everything buffered.
    pub fn rewind(&mut self) -> Result<(), Error> {
        self.src.rewind_to_start()?;
        self.head = 0;
        self.filled = 0;
        self.eof = false;
        Ok(())
    }

    fn peek_into(&mut self, delta: usize, out: &mut [u8]) -> Result<(), Error> {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.peek_u8(delta + i)?;
        }
        Ok(())
    }

    fn byte_at(&self, abs: u64) -> u8 {
        self.buf[(abs % RING_BYTES as u64) as usize]
    }

    /// Makes the byte at absolute offset `abs` available, refilling
    /// segments forward as needed. Returns false if the stream ends before
    /// `abs`.
    fn ensure(&mut self, abs: u64) -> Result<bool, Error> {
        if abs >= self.head + RING_BYTES as u64 {
            return Err(Error::WindowExceeded {
                offset: self.head,
                limit: RING_BYTES,
            });
        }
        let mut refills = 0;
        while abs >= self.filled {
            if self.eof {
                return Ok(false);
            }
            refills += 1;
            if refills > SEGMENTS {
                return Err(Error::WindowExceeded {
                    offset: self.head,
                    limit: RING_BYTES,
                });
            }
            self.refill_next_segment()?;
        }
        Ok(true)
    }

    /// Reads up to one segment from the stream into the slot following the
    /// last filled one, wrapping around the ring. A short read latches EOF
    /// but whatever bytes did arrive stay readable.
    fn refill_next_segment(&mut self) -> Result<(), Error> {
        let seg_start = (self.filled % RING_BYTES as u64) as usize;
        debug_assert_eq!(seg_start % SEG_BYTES, 0);
        let segment = &mut self.buf[seg_start..seg_start + SEG_BYTES];
        let mut got = 0;
        while got < SEG_BYTES {
            match self.src.read(&mut segment[got..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.filled += got as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn reader(data: Vec<u8>) -> RingReader<Cursor<Vec<u8>>> {
        RingReader::new(Cursor::new(data))
    }

    #[test]
    fn peeks_refill_on_demand() {
        let data = pattern(3 * RING_BYTES);
        let mut r = reader(data.clone());
        assert_eq!(r.peek_u8(0).unwrap(), data[0]);
        assert_eq!(r.peek_u8(SEG_BYTES - 1).unwrap(), data[SEG_BYTES - 1]);
        // Reaches into the second and third segment.
        assert_eq!(r.peek_u8(SEG_BYTES).unwrap(), data[SEG_BYTES]);
        assert_eq!(r.peek_u8(2 * SEG_BYTES + 17).unwrap(), data[2 * SEG_BYTES + 17]);
    }

    #[test]
    fn consume_then_peek_wraps_around_the_ring() {
        let data = pattern(4 * RING_BYTES);
        let mut r = reader(data.clone());
        let mut scratch = vec![0u8; 1000];
        let mut consumed = 0;
        // March well past one full ring so refills wrap several times.
        while consumed + scratch.len() < 3 * RING_BYTES {
            r.consume_into(&mut scratch).unwrap();
            assert_eq!(scratch, data[consumed..consumed + scratch.len()]);
            consumed += scratch.len();
        }
        assert_eq!(r.peek_u8(123).unwrap(), data[consumed + 123]);
    }

    #[test]
    fn native_order_peeks_match_byteorder() {
        let data = pattern(100);
        let mut r = reader(data.clone());
        assert_eq!(r.peek_u16(10).unwrap(), NativeEndian::read_u16(&data[10..12]));
        assert_eq!(r.peek_u32(20).unwrap(), NativeEndian::read_u32(&data[20..24]));
        r.consume_into(&mut [0u8; 8]).unwrap();
        assert_eq!(r.peek_u32(0).unwrap(), NativeEndian::read_u32(&data[8..12]));
    }

    #[test]
    fn multi_byte_peek_across_segment_boundary() {
        let data = pattern(2 * RING_BYTES);
        let mut r = reader(data.clone());
        let at = SEG_BYTES - 1;
        assert_eq!(r.peek_u16(at).unwrap(), NativeEndian::read_u16(&data[at..at + 2]));
    }

    #[test]
    fn short_input_ends_cleanly_at_the_last_byte() {
        let data = pattern(10_000);
        let mut r = reader(data.clone());
        let mut scratch = vec![0u8; 9_990];
        r.consume_into(&mut scratch).unwrap();
        assert_eq!(r.peek_u8(9).unwrap(), data[9_999]);
        assert!(matches!(
            r.peek_u8(10),
            Err(Error::TruncatedToken { offset: 9_990 })
        ));
        let mut rest = vec![0u8; 10];
        r.consume_into(&mut rest).unwrap();
        assert_eq!(r.peek_head().unwrap(), None);
        assert!(r.at_eof());
    }

    #[test]
    fn input_ending_on_a_segment_boundary_still_ends_cleanly() {
        let data = pattern(2 * SEG_BYTES);
        let mut r = reader(data.clone());
        let mut scratch = vec![0u8; 2 * SEG_BYTES];
        r.consume_into(&mut scratch).unwrap();
        assert_eq!(scratch, data);
        assert_eq!(r.peek_head().unwrap(), None);
        assert!(r.at_eof());
    }

    #[test]
    fn peeking_past_the_window_is_fatal() {
        let data = pattern(3 * RING_BYTES);
        let mut r = reader(data);
        assert!(matches!(
            r.peek_u8(RING_BYTES),
            Err(Error::WindowExceeded { offset: 0, .. })
        ));
    }

    #[test]
    fn rewind_starts_over() {
        let data = pattern(50_000);
        let mut r = reader(data.clone());
        let mut scratch = vec![0u8; 40_000];
        r.consume_into(&mut scratch).unwrap();
        r.rewind().unwrap();
        assert_eq!(r.position(), 0);
        assert_eq!(r.peek_u8(0).unwrap(), data[0]);
        assert_eq!(r.peek_head().unwrap(), Some(data[0]));
    }
}
