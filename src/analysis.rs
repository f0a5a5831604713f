use serde::Serialize;
use serde_json::Value;

/// Printable-ASCII range used by the binary heuristic
const PRINTABLE_ASCII_MIN: u8 = 32;
const PRINTABLE_ASCII_MAX: u8 = 126;

/// Fraction of non-printable bytes above which a payload is tagged binary
const BINARY_RATIO_THRESHOLD: f64 = 0.3;

/// Heuristic content tags attached to a payload. Not mutually exclusive:
/// a JSON string literal is both text and JSON, and nothing stops a payload
/// from matching all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Text,
    Json,
    Binary,
}

/// Outcome of decoding a payload under one text encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "success")]
pub enum DecodeAttempt {
    #[serde(rename = "false")]
    Failed,
    #[serde(rename = "true")]
    Decoded {
        text: String,
        printable_chars: usize,
    },
}

impl DecodeAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self, DecodeAttempt::Decoded { .. })
    }

    /// Decoded text, if the attempt succeeded.
    pub fn text(&self) -> Option<&str> {
        match self {
            DecodeAttempt::Decoded { text, .. } => Some(text),
            DecodeAttempt::Failed => None,
        }
    }
}

/// One decode attempt per supported text encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeAttempts {
    pub utf8: DecodeAttempt,
    pub ascii: DecodeAttempt,
    pub latin1: DecodeAttempt,
}

/// Stateless analysis of one datagram payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentAnalysis {
    pub length: usize,
    pub decode_attempts: DecodeAttempts,
    pub possible_formats: Vec<PayloadFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_content: Option<Value>,
    /// First four bytes as an unsigned 32-bit integer, big-endian.
    /// Present only when the payload is at least four bytes long.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_u32_be: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_u32_le: Option<u32>,
}

impl ContentAnalysis {
    pub fn has_format(&self, format: PayloadFormat) -> bool {
        self.possible_formats.contains(&format)
    }

    /// UTF-8 rendering of the payload, when it decoded cleanly.
    pub fn utf8_text(&self) -> Option<&str> {
        self.decode_attempts.utf8.text()
    }
}

/// Classify a raw payload. Pure and total: no input is an error, unsupported
/// content simply yields fewer tags and empty optional fields.
pub fn classify(payload: &[u8]) -> ContentAnalysis {
    let decode_attempts = DecodeAttempts {
        utf8: decode_utf8(payload),
        ascii: decode_ascii(payload),
        latin1: decode_latin1(payload),
    };

    let mut possible_formats = Vec::new();
    let mut json_content = None;

    if let Some(text) = decode_attempts.utf8.text() {
        // Plain text means every character is either printable or whitespace
        if text.chars().all(|c| is_printable(c) || c.is_whitespace()) {
            possible_formats.push(PayloadFormat::Text);
        }

        // A parse failure here is a non-match, not an error
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            possible_formats.push(PayloadFormat::Json);
            json_content = Some(value);
        }
    }

    let (as_u32_be, as_u32_le) = match payload.first_chunk::<4>() {
        Some(head) => (
            Some(u32::from_be_bytes(*head)),
            Some(u32::from_le_bytes(*head)),
        ),
        None => (None, None),
    };

    // Ratio of bytes outside the printable-ASCII range. Empty payloads skip
    // the check entirely so the ratio is never 0/0.
    if !payload.is_empty() {
        let non_printable = payload
            .iter()
            .filter(|&&b| b < PRINTABLE_ASCII_MIN || b > PRINTABLE_ASCII_MAX)
            .count();
        if non_printable as f64 / payload.len() as f64 > BINARY_RATIO_THRESHOLD {
            possible_formats.push(PayloadFormat::Binary);
        }
    }

    ContentAnalysis {
        length: payload.len(),
        decode_attempts,
        possible_formats,
        json_content,
        as_u32_be,
        as_u32_le,
    }
}

/// Printable per the pinned definition: everything except control characters.
/// Space separators count as printable; other whitespace (tab, newline) does not.
fn is_printable(c: char) -> bool {
    !c.is_control()
}

fn decode_utf8(payload: &[u8]) -> DecodeAttempt {
    match std::str::from_utf8(payload) {
        Ok(text) => decoded(text.to_owned()),
        Err(_) => DecodeAttempt::Failed,
    }
}

/// Strict 7-bit ASCII: any byte >= 0x80 fails the whole payload.
fn decode_ascii(payload: &[u8]) -> DecodeAttempt {
    if payload.is_ascii() {
        // Valid ASCII is valid UTF-8 by construction
        decoded(String::from_utf8_lossy(payload).into_owned())
    } else {
        DecodeAttempt::Failed
    }
}

/// Latin-1 never fails: every byte maps 1:1 to U+0000..=U+00FF.
fn decode_latin1(payload: &[u8]) -> DecodeAttempt {
    decoded(payload.iter().map(|&b| char::from(b)).collect())
}

fn decoded(text: String) -> DecodeAttempt {
    let printable_chars = text.chars().filter(|&c| is_printable(c)).count();
    DecodeAttempt::Decoded {
        text,
        printable_chars,
    }
}
