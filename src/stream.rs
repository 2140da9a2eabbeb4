use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Trails are written once and archived; spend the cycles on compression.
const GZIP_OUTPUT_LEVEL: u32 = 9;

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// A byte source that can be rewound to its first byte. The trail reader
/// needs this once per input, after peeking at the leading token id.
pub trait RewindRead: Read {
    fn rewind_to_start(&mut self) -> io::Result<()>;
}

impl RewindRead for Cursor<Vec<u8>> {
    fn rewind_to_start(&mut self) -> io::Result<()> {
        self.set_position(0);
        Ok(())
    }
}

/// Byte source for one audit trail. Gzip-compressed inputs are detected by
/// their magic bytes and decompressed transparently; everything else is
/// passed through as-is.
pub struct TrailInput {
    inner: Inner,
    gzip: bool,
}

enum Inner {
    Plain(Box<dyn ReadSeek>),
    Gzip(GzDecoder<Box<dyn ReadSeek>>),
    /// Only observable if a rewind failed halfway through.
    Poisoned,
}

impl TrailInput {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = BufReader::new(File::open(path)?);
        Self::from_seekable(Box::new(file))
    }

    /// Wraps an in-memory trail. Standard input is funneled through this
    /// because the leading header check needs to rewind.
    pub fn from_bytes(data: Vec<u8>) -> io::Result<Self> {
        Self::from_seekable(Box::new(Cursor::new(data)))
    }

    pub fn stdin_buffered() -> io::Result<Self> {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    fn from_seekable(mut raw: Box<dyn ReadSeek>) -> io::Result<Self> {
        let mut magic = [0u8; 2];
        let got = read_up_to(&mut raw, &mut magic)?;
        raw.seek(SeekFrom::Start(0))?;
        let gzip = got == magic.len() && magic == GZIP_MAGIC;
        Ok(TrailInput {
            inner: Self::wrap(raw, gzip),
            gzip,
        })
    }

    fn wrap(raw: Box<dyn ReadSeek>, gzip: bool) -> Inner {
        if gzip {
            Inner::Gzip(GzDecoder::new(raw))
        } else {
            Inner::Plain(raw)
        }
    }
}

impl Read for TrailInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Plain(raw) => raw.read(buf),
            Inner::Gzip(decoder) => decoder.read(buf),
            Inner::Poisoned => Err(poisoned()),
        }
    }
}

impl RewindRead for TrailInput {
    fn rewind_to_start(&mut self) -> io::Result<()> {
        let mut raw = match mem::replace(&mut self.inner, Inner::Poisoned) {
            Inner::Plain(raw) => raw,
            Inner::Gzip(decoder) => decoder.into_inner(),
            Inner::Poisoned => return Err(poisoned()),
        };
        raw.seek(SeekFrom::Start(0))?;
        self.inner = Self::wrap(raw, self.gzip);
        Ok(())
    }
}

fn poisoned() -> io::Error {
    io::Error::other("trail input unusable after a failed rewind")
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Destination for the rewritten trail: either plain bytes or a gzip
/// stream, never both.
pub enum TrailOutput<W: Write> {
    Plain(BufWriter<W>),
    Gzip(GzEncoder<W>),
}

impl<W: Write> TrailOutput<W> {
    pub fn new(sink: W, gzip: bool) -> Self {
        if gzip {
            TrailOutput::Gzip(GzEncoder::new(sink, Compression::new(GZIP_OUTPUT_LEVEL)))
        } else {
            TrailOutput::Plain(BufWriter::new(sink))
        }
    }

    pub fn write_token(&mut self, token: &[u8]) -> io::Result<()> {
        match self {
            TrailOutput::Plain(writer) => writer.write_all(token),
            TrailOutput::Gzip(encoder) => encoder.write_all(token),
        }
    }

    /// Pushes everything written so far down to the sink. For gzip output
    /// this is a sync flush, so the stream stays decodable if the process
    /// dies afterwards.
    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            TrailOutput::Plain(writer) => writer.flush(),
            TrailOutput::Gzip(encoder) => encoder.flush(),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            TrailOutput::Plain(writer) => writer.into_inner().map_err(|e| e.into_error()),
            TrailOutput::Gzip(encoder) => encoder.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_input_passes_through() {
        let data = vec![0x11, 0x22, 0x33];
        let mut input = TrailInput::from_bytes(data.clone()).unwrap();
        let mut out = Vec::new();
        input.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn gzip_input_is_decompressed() {
        let payload = b"not actually a trail, but enough for the decoder".to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut input = TrailInput::from_bytes(compressed).unwrap();
        let mut out = Vec::new();
        input.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn rewind_restarts_both_kinds_of_input() {
        let payload = vec![7u8; 100];
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        for data in [payload.clone(), compressed] {
            let mut input = TrailInput::from_bytes(data).unwrap();
            let mut first = Vec::new();
            input.read_to_end(&mut first).unwrap();
            input.rewind_to_start().unwrap();
            let mut second = Vec::new();
            input.read_to_end(&mut second).unwrap();
            assert_eq!(first, payload);
            assert_eq!(second, payload);
        }
    }

    #[test]
    fn gzip_output_round_trips() {
        let mut output = TrailOutput::new(Vec::new(), true);
        output.write_token(b"abc").unwrap();
        output.write_token(b"def").unwrap();
        let compressed = output.finish().unwrap();

        let mut decoder = GzDecoder::new(Cursor::new(compressed));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdef");
    }
}
