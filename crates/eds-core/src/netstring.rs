//! Netstring encoding: `<decimal length>:<bytes>,`
//!
//! The parser never copies; it returns a view into the input plus the number
//! of bytes consumed. Running out of input is reported as
//! [`NetstringError::Incomplete`] and never as a format error, so a caller
//! can feed a growing buffer until the parse succeeds.

use crate::buf::Buffer;
use crate::error::{NetstringError, NsResult};

/// Render `n` as decimal ASCII into `out`, returning the used tail.
fn fmt_u64(mut n: u64, out: &mut [u8; 20]) -> &[u8] {
    let mut i = out.len();
    loop {
        i -= 1;
        out[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &out[i..]
}

/// Size of the netstring encoding of an `n` byte payload.
pub fn encoded_len(n: usize) -> usize {
    let mut scratch = [0u8; 20];
    fmt_u64(n as u64, &mut scratch).len() + n + 2
}

/// Append `data` to `out` as one netstring.
pub fn append(out: &mut Buffer, data: &[u8]) -> NsResult<()> {
    let mut scratch = [0u8; 20];
    let digits = fmt_u64(data.len() as u64, &mut scratch);
    out.reserve(digits.len() + data.len() + 2)?;
    out.append(digits)?;
    out.push(b':')?;
    out.append(data)?;
    out.push(b',')?;
    Ok(())
}

/// Append the decimal rendering of `v` as one netstring.
pub fn append_long(out: &mut Buffer, v: i64) -> NsResult<()> {
    let mut scratch = [0u8; 20];
    let digits = fmt_u64(v.unsigned_abs(), &mut scratch);
    if v < 0 {
        let mut signed = [0u8; 21];
        signed[0] = b'-';
        signed[1..=digits.len()].copy_from_slice(digits);
        append(out, &signed[..=digits.len()])
    } else {
        append(out, digits)
    }
}

/// Parse one netstring from the front of `src`.
///
/// Returns the payload and the total number of bytes consumed, including
/// the length prefix and trailing comma.
pub fn parse(src: &[u8]) -> NsResult<(&[u8], usize)> {
    let mut len: usize = 0;
    let mut i = 0;

    // length state
    loop {
        let c = *src.get(i).ok_or(NetstringError::Incomplete)?;
        match c {
            b'0'..=b'9' => {
                len = len
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(usize::from(c - b'0')))
                    .ok_or(NetstringError::TooLarge)?;
            }
            b':' if i > 0 => break,
            _ => return Err(NetstringError::Format),
        }
        i += 1;
    }

    // data state
    let start = i + 1;
    let end = start.checked_add(len).ok_or(NetstringError::TooLarge)?;
    if end >= src.len() {
        return Err(NetstringError::Incomplete);
    }
    if src[end] != b',' {
        return Err(NetstringError::Format);
    }
    Ok((&src[start..end], end + 1))
}

/// Decode a netstring payload holding a decimal integer.
pub fn parse_long(payload: &[u8]) -> NsResult<i64> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(NetstringError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(data: &[u8]) -> Vec<u8> {
        let mut buf = Buffer::new();
        append(&mut buf, data).unwrap();
        buf.as_slice().to_vec()
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(b""), b"0:,");
        assert_eq!(encode(b"10.0.0.1"), b"8:10.0.0.1,");
        assert_eq!(encoded_len(8), 11);
        assert_eq!(encoded_len(0), 3);
        assert_eq!(encoded_len(100), 106);
    }

    #[test]
    fn test_parse_ok() {
        let (data, used) = parse(b"3:yes,trailing").unwrap();
        assert_eq!(data, b"yes");
        assert_eq!(used, 6);

        let (data, used) = parse(b"0:,").unwrap();
        assert!(data.is_empty());
        assert_eq!(used, 3);
    }

    #[test]
    fn test_parse_format_errors() {
        assert_eq!(parse(b":abc,"), Err(NetstringError::Format));
        assert_eq!(parse(b"3x:abc,"), Err(NetstringError::Format));
        assert_eq!(parse(b"3:abc;"), Err(NetstringError::Format));
        assert_eq!(parse(b"-1:a,"), Err(NetstringError::Format));
    }

    #[test]
    fn test_parse_too_large() {
        let src = b"99999999999999999999999999:x,";
        assert_eq!(parse(src), Err(NetstringError::TooLarge));
    }

    #[test]
    fn test_every_prefix_incomplete() {
        let full = encode(b"hello world");
        for n in 0..full.len() {
            assert_eq!(parse(&full[..n]), Err(NetstringError::Incomplete), "prefix {}", n);
        }
        assert!(parse(&full).is_ok());
    }

    #[test]
    fn test_long_roundtrip_values() {
        for v in [0i64, 7, -7, 1 << 40, i64::MAX, i64::MIN] {
            let mut buf = Buffer::new();
            append_long(&mut buf, v).unwrap();
            let (payload, _) = parse(buf.as_slice()).unwrap();
            assert_eq!(parse_long(payload).unwrap(), v);
        }
    }

    #[test]
    fn test_long_rejects_garbage() {
        assert_eq!(parse_long(b"12a"), Err(NetstringError::Format));
        assert_eq!(parse_long(b""), Err(NetstringError::Format));
    }
}
