//! LZ77 tokenizer used as the optional pre-pass of hybrid frames.
//!
//! Every token is a back-reference (possibly empty) followed by one literal.
//! Tokens serialize to fixed 5-byte records: offset hi/lo, length hi/lo, literal.

use crate::error::CompressError;

pub const DEFAULT_WINDOW: usize = 4096;
pub const DEFAULT_LOOKAHEAD: usize = 18;
pub const TOKEN_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub offset: u16,
    pub length: u16,
    pub next: u8,
}

impl Token {
    pub fn literal(next: u8) -> Self {
        Self { offset: 0, length: 0, next }
    }
}

/// Greedy longest-match tokenization.
///
/// Candidates are scanned nearest first and only a strictly longer match
/// replaces the current best, so ties resolve to the smallest offset. Matches
/// stop one byte short of the input end so each token carries a real literal.
pub fn compress(data: &[u8], window: usize, lookahead: usize) -> Result<Vec<Token>, CompressError> {
    if window == 0 || window > u16::MAX as usize {
        return Err(CompressError::InvalidInput(format!("lz77 window {window} out of range")));
    }
    if lookahead == 0 || lookahead > u16::MAX as usize {
        return Err(CompressError::InvalidInput(format!("lz77 lookahead {lookahead} out of range")));
    }

    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let max_len = lookahead.min(data.len() - pos - 1);
        let mut best_offset = 0;
        let mut best_length = 0;
        for distance in 1..=window.min(pos) {
            let start = pos - distance;
            let mut len = 0;
            while len < max_len && data[start + len] == data[pos + len] {
                len += 1;
            }
            if len > best_length {
                best_length = len;
                best_offset = distance;
                if len == max_len {
                    break;
                }
            }
        }
        tokens.push(Token {
            offset: best_offset as u16,
            length: best_length as u16,
            next: data[pos + best_length],
        });
        pos += best_length + 1;
    }
    Ok(tokens)
}

/// Replay tokens, copying `length` bytes from `offset` behind the cursor before each literal.
pub fn decompress(tokens: &[Token]) -> Result<Vec<u8>, CompressError> {
    let mut out: Vec<u8> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        let offset = token.offset as usize;
        let length = token.length as usize;
        if length > 0 {
            if offset == 0 || offset > out.len() {
                return Err(CompressError::CorruptToken(format!(
                    "token {i}: offset {offset} with {} bytes decoded",
                    out.len()
                )));
            }
            let start = out.len() - offset;
            // byte-wise so overlapping runs (offset < length) replicate
            for j in 0..length {
                let byte = out[start + j];
                out.push(byte);
            }
        }
        out.push(token.next);
    }
    Ok(out)
}

pub fn tokens_to_bytes(tokens: &[Token]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(tokens.len() * TOKEN_SIZE);
    for token in tokens {
        bytes.extend_from_slice(&token.offset.to_be_bytes());
        bytes.extend_from_slice(&token.length.to_be_bytes());
        bytes.push(token.next);
    }
    bytes
}

pub fn bytes_to_tokens(bytes: &[u8]) -> Result<Vec<Token>, CompressError> {
    if bytes.len() % TOKEN_SIZE != 0 {
        return Err(CompressError::CorruptToken(format!(
            "token stream of {} bytes is not a multiple of {TOKEN_SIZE}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(TOKEN_SIZE)
        .map(|rec| Token {
            offset: u16::from_be_bytes([rec[0], rec[1]]),
            length: u16::from_be_bytes([rec[2], rec[3]]),
            next: rec[4],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let tokens = compress(data, DEFAULT_WINDOW, DEFAULT_LOOKAHEAD).unwrap();
        assert_eq!(decompress(&tokens).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_inputs() {
        roundtrip(b"");
        roundtrip(b"a");
        roundtrip(b"abcabcabcabcabcabcabc");
        roundtrip(&[7u8; 1000]);
        roundtrip(&(0..=255).collect::<Vec<u8>>());
        roundtrip(b"the rain in spain stays mainly in the plain");
    }

    #[test]
    fn test_every_token_has_literal() {
        let data = b"abababab";
        let tokens = compress(data, DEFAULT_WINDOW, DEFAULT_LOOKAHEAD).unwrap();
        assert_eq!(tokens[0], Token::literal(b'a'));
        assert_eq!(tokens[1], Token::literal(b'b'));
        // overlapping copy of "ababa" then literal 'b'
        assert_eq!(tokens[2], Token { offset: 2, length: 5, next: b'b' });
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn test_nearest_offset_wins_ties() {
        // the final "ab" matches at distance 3 and 6
        let data = b"abXabYab!";
        let tokens = compress(data, DEFAULT_WINDOW, DEFAULT_LOOKAHEAD).unwrap();
        let last = tokens.last().unwrap();
        assert_eq!((last.offset, last.length, last.next), (3, 2, b'!'));
    }

    #[test]
    fn test_window_and_lookahead_bounds() {
        let data = vec![1u8; 500];
        let tokens = compress(&data, 8, 4).unwrap();
        assert!(tokens.iter().all(|t| t.offset <= 8 && t.length <= 4));
        assert_eq!(decompress(&tokens).unwrap(), data);
        assert!(compress(&data, 0, 4).is_err());
        assert!(compress(&data, 70_000, 4).is_err());
    }

    #[test]
    fn test_sentinel_token_decodes() {
        let tokens = [Token::literal(b'a'), Token { offset: 1, length: 3, next: 0 }];
        assert_eq!(decompress(&tokens).unwrap(), b"aaaa\0");
    }

    #[test]
    fn test_corrupt_offset() {
        let tokens = [Token::literal(b'a'), Token { offset: 5, length: 2, next: b'b' }];
        assert!(matches!(decompress(&tokens), Err(CompressError::CorruptToken(_))));
        let tokens = [Token { offset: 0, length: 2, next: b'b' }];
        assert!(matches!(decompress(&tokens), Err(CompressError::CorruptToken(_))));
    }

    #[test]
    fn test_token_serialization() {
        let tokens = vec![
            Token::literal(0x41),
            Token { offset: 0x0102, length: 0x0304, next: 0x05 },
        ];
        let bytes = tokens_to_bytes(&tokens);
        assert_eq!(&bytes[5..], &[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(bytes_to_tokens(&bytes).unwrap(), tokens);
        assert!(matches!(bytes_to_tokens(&bytes[..7]), Err(CompressError::CorruptToken(_))));
    }
}
