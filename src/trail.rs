use std::io::Write;

use log::warn;

use crate::error::Error;
use crate::rewrite::Rewriter;
use crate::ring::{RingReader, SEG_BYTES};
use crate::stream::{RewindRead, TrailOutput};
use crate::tokens::{self, TokenTrace, AUT_OTHER_FILE32, AUT_OTHER_FILE64};

/// Per-token scratch space. Anything the framer sizes beyond this cannot be
/// a real token and aborts the run.
const SCRATCH_BYTES: usize = SEG_BYTES;

/// How many output bytes may accumulate before the sink is flushed, so an
/// interrupted run loses at most this much.
const FLUSH_EVERY_BYTES: u64 = 5_000_000;

/// Pseudonymizes one audit trail: token in, token out, byte counts
/// unchanged. Inputs that do not start with a file token are skipped with a
/// warning — every Solaris trail opens and closes with one, so anything
/// else is not a trail.
///
/// `bytes_since_flush` is shared across the inputs of a run to keep the
/// flush cadence global.
pub fn process_trail<R: RewindRead, W: Write>(
    reader: &mut RingReader<R>,
    rewriter: &mut Rewriter,
    output: &mut TrailOutput<W>,
    bytes_since_flush: &mut u64,
    name: &str,
) -> Result<(), Error> {
    match reader.peek_head()? {
        Some(AUT_OTHER_FILE32) | Some(AUT_OTHER_FILE64) => {}
        _ => {
            warn!("skipping {name}: not a Solaris BSM audit trail");
            return Ok(());
        }
    }
    reader.rewind()?;

    let mut trace = TokenTrace::new();
    let mut scratch = vec![0u8; SCRATCH_BYTES];
    while let Some(id) = reader.peek_head()? {
        trace.record(id);
        let size = tokens::token_size(reader, id, &trace)?;
        if size > SCRATCH_BYTES {
            return Err(Error::TokenTooLarge {
                offset: reader.position(),
                size,
                limit: SCRATCH_BYTES,
            });
        }
        let token = &mut scratch[..size];
        reader.consume_into(token)?;
        rewriter.rewrite_token(token)?;
        output.write_token(token)?;

        *bytes_since_flush += size as u64;
        if *bytes_since_flush >= FLUSH_EVERY_BYTES {
            output.flush()?;
            *bytes_since_flush = 0;
        }
    }
    debug_assert!(reader.at_eof());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};

    use byteorder::{ByteOrder, NativeEndian};
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::random::RandomSource;
    use crate::rewrite::{IdRange, RewriteConfig};
    use crate::stream::TrailInput;
    use crate::tokens::*;

    fn file_token(name: &[u8]) -> Vec<u8> {
        let mut t = vec![AUT_OTHER_FILE32];
        t.extend_from_slice(&100u32.to_ne_bytes());
        t.extend_from_slice(&0u32.to_ne_bytes());
        t.extend_from_slice(&(name.len() as u16).to_ne_bytes());
        t.extend_from_slice(name);
        t
    }

    fn header32(seconds: u32) -> Vec<u8> {
        let mut t = vec![0u8; 18];
        t[0] = AUT_HEADER32;
        NativeEndian::write_u32(&mut t[10..14], seconds);
        t
    }

    fn trailer() -> Vec<u8> {
        let mut t = vec![0u8; 7];
        t[0] = AUT_TRAILER;
        t
    }

    fn subject32(uid: u32) -> Vec<u8> {
        let mut t = vec![0u8; 37];
        t[0] = AUT_SUBJECT32;
        for offset in [1, 5, 13] {
            NativeEndian::write_u32(&mut t[offset..offset + 4], uid);
        }
        t
    }

    fn trail(body: &[Vec<u8>]) -> Vec<u8> {
        let mut stream = file_token(b"20250101120000.20250101130000.host\0");
        stream.extend_from_slice(&header32(1000));
        for token in body {
            stream.extend_from_slice(token);
        }
        stream.extend_from_slice(&trailer());
        stream.extend_from_slice(&file_token(b""));
        stream
    }

    fn run_bytes(input: Vec<u8>, rewriter: &mut Rewriter) -> Result<Vec<u8>, Error> {
        let mut reader = RingReader::new(TrailInput::from_bytes(input).unwrap());
        let mut output = TrailOutput::new(Vec::new(), false);
        let mut flushed = 0;
        process_trail(&mut reader, rewriter, &mut output, &mut flushed, "test")?;
        Ok(output.finish()?)
    }

    fn disabled_rewriter() -> Rewriter {
        Rewriter::new(RewriteConfig::disabled(), RandomSource::with_seed(1))
    }

    #[test]
    fn pass_through_is_bit_identical() {
        let input = trail(&[
            subject32(400),
            {
                let mut t = vec![AUT_PATH];
                t.extend_from_slice(&17u16.to_ne_bytes());
                t.extend_from_slice(b"/home/alice/file\0");
                t
            },
            {
                let mut t = vec![AUT_EXEC_ARGS];
                t.extend_from_slice(&2u32.to_ne_bytes());
                t.extend_from_slice(b"ls\0-l\0");
                t
            },
        ]);
        let output = run_bytes(input.clone(), &mut disabled_rewriter()).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn rewriting_preserves_length_and_framing() {
        let input = trail(&[subject32(400), subject32(401), subject32(400)]);
        let config = RewriteConfig {
            uids: Some(IdRange {
                min: 200,
                max: 60_000,
            }),
            time_shift_max: Some(3600),
            ..RewriteConfig::disabled()
        };
        let mut rewriter = Rewriter::new(config, RandomSource::with_seed(5));
        let delta = rewriter.time_delta();
        let output = run_bytes(input.clone(), &mut rewriter).unwrap();
        assert_eq!(output.len(), input.len());

        // Token boundaries and ids are unchanged.
        let mut in_reader = RingReader::new(TrailInput::from_bytes(input.clone()).unwrap());
        let mut out_reader = RingReader::new(TrailInput::from_bytes(output.clone()).unwrap());
        let trace = TokenTrace::new();
        loop {
            let a = in_reader.peek_head().unwrap();
            let b = out_reader.peek_head().unwrap();
            assert_eq!(a, b);
            let Some(id) = a else { break };
            let a_size = token_size(&mut in_reader, id, &trace).unwrap();
            let b_size = token_size(&mut out_reader, id, &trace).unwrap();
            assert_eq!(a_size, b_size);
            in_reader.consume_into(&mut vec![0; a_size]).unwrap();
            out_reader.consume_into(&mut vec![0; b_size]).unwrap();
        }

        // Both subject tokens with uid 400 carry the same pseudonym; the
        // one with 401 differs from the original.
        let first = file_token(b"20250101120000.20250101130000.host\0").len() + 18;
        let s1 = &output[first..first + 37];
        let s2 = &output[first + 37..first + 74];
        let s3 = &output[first + 74..first + 111];
        assert_eq!(s1[1..5], s3[1..5]);
        assert_ne!(s1[1..5], s2[1..5]);

        // Every timestamp moved by the same delta.
        let header_at = first - 18;
        assert_eq!(
            NativeEndian::read_u32(&output[header_at + 10..header_at + 14]),
            1000u32.wrapping_sub(delta)
        );
        assert_eq!(
            NativeEndian::read_u32(&output[1..5]),
            100u32.wrapping_sub(delta)
        );
    }

    #[test]
    fn a_zero_draw_from_the_shift_bound_leaves_the_trail_untouched() {
        // With a shift bound of one second the only possible delta is 0,
        // so even with time rewriting on the bytes come through unchanged.
        let config = RewriteConfig {
            time_shift_max: Some(1),
            ..RewriteConfig::disabled()
        };
        let mut rewriter = Rewriter::new(config, RandomSource::with_seed(9));
        assert_eq!(rewriter.time_delta(), 0);
        let input = trail(&[]);
        let output = run_bytes(input.clone(), &mut rewriter).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn mapping_state_spans_multiple_inputs() {
        let config = RewriteConfig {
            uids: Some(IdRange {
                min: 200,
                max: 60_000,
            }),
            ..RewriteConfig::disabled()
        };
        let mut rewriter = Rewriter::new(config, RandomSource::with_seed(5));
        let first = run_bytes(trail(&[subject32(777)]), &mut rewriter).unwrap();
        let second = run_bytes(trail(&[subject32(777)]), &mut rewriter).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn non_trail_input_is_skipped_without_output() {
        let mut input = header32(1000);
        input.extend_from_slice(&trailer());
        let output = run_bytes(input, &mut disabled_rewriter()).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn empty_input_is_skipped_without_output() {
        let output = run_bytes(Vec::new(), &mut disabled_rewriter()).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn unknown_id_aborts_with_offset_and_trace() {
        let mut input = file_token(b"");
        let bad_at = input.len() as u64;
        input.push(0xff);
        input.extend_from_slice(&[0; 8]);
        let err = run_bytes(input, &mut disabled_rewriter()).unwrap_err();
        match err {
            Error::UnknownTokenId { id, offset, trace } => {
                assert_eq!(id, 0xff);
                assert_eq!(offset, bad_at);
                assert_eq!(trace, "0x11 -> 0xff");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn truncated_token_aborts() {
        let mut input = file_token(b"");
        input.extend_from_slice(&header32(1000)[..10]);
        let err = run_bytes(input, &mut disabled_rewriter()).unwrap_err();
        assert!(matches!(err, Error::TruncatedToken { offset: 11 }));
    }

    #[test]
    fn gzip_input_and_output_round_trip() {
        let plain = trail(&[subject32(400)]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trail.gz");
        std::fs::write(&path, &compressed).unwrap();

        let mut reader = RingReader::new(TrailInput::open(&path).unwrap());
        let mut output = TrailOutput::new(Vec::new(), true);
        let mut flushed = 0;
        process_trail(
            &mut reader,
            &mut disabled_rewriter(),
            &mut output,
            &mut flushed,
            "trail.gz",
        )
        .unwrap();
        let recompressed = output.finish().unwrap();

        let mut decoder = GzDecoder::new(Cursor::new(recompressed));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn large_trails_stream_through_the_window() {
        // Enough tokens to wrap the ring several times.
        let mut body = Vec::new();
        for i in 0..4000 {
            body.push(subject32(200 + (i % 50)));
        }
        let input = trail(&body);
        assert!(input.len() > 4 * 32768);
        let output = run_bytes(input.clone(), &mut disabled_rewriter()).unwrap();
        assert_eq!(output, input);
    }
}
