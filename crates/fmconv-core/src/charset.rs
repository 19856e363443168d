//! The template encodings the converter can read and write.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    /// Looks up a charset by any of its common names, ignoring case.
    pub fn for_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" | "cp819" => {
                Some(Self::Latin1)
            }
            "us-ascii" | "ascii" | "iso646-us" => Some(Self::Ascii),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "ISO-8859-1",
            Self::Ascii => "US-ASCII",
        }
    }

    /// Decodes `bytes`; a leading UTF-8 byte order mark is dropped.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, CharsetError> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(bytes)
                    .map(str::to_string)
                    .map_err(|e| CharsetError {
                        charset: *self,
                        offset: e.valid_up_to(),
                    })
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Self::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(CharsetError {
                    charset: *self,
                    offset,
                }),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, CharsetError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Latin1 | Self::Ascii => {
                let limit = if *self == Self::Latin1 { 0xFF } else { 0x7F };
                let mut out = Vec::with_capacity(text.len());
                for (offset, c) in text.char_indices() {
                    let code = c as u32;
                    if code > limit {
                        return Err(CharsetError {
                            charset: *self,
                            offset,
                        });
                    }
                    out.push(code as u8);
                }
                Ok(out)
            }
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Content can't be represented in {charset} (at byte offset {offset})")]
pub struct CharsetError {
    pub charset: Charset,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(Charset::for_name("utf-8"), Some(Charset::Utf8));
        assert_eq!(Charset::for_name("ISO-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::for_name("iso_8859_1"), Some(Charset::Latin1));
        assert_eq!(Charset::for_name("US-ASCII"), Some(Charset::Ascii));
        assert_eq!(Charset::for_name("Shift_JIS"), None);
    }

    #[test]
    fn test_latin1_round_trip() {
        let bytes = [b'a', 0xE9, b'b'];
        let text = Charset::Latin1.decode(&bytes).unwrap();
        assert_eq!(text, "a\u{e9}b");
        assert_eq!(Charset::Latin1.encode(&text).unwrap(), bytes.to_vec());
        assert!(Charset::Latin1.encode("\u{20ac}").is_err());
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(
            Charset::Utf8.decode(&[b'a', 0xFF]).unwrap_err().offset,
            1
        );
        assert!(Charset::Ascii.decode(&[0xE9]).is_err());
        assert_eq!(Charset::Utf8.decode(b"\xEF\xBB\xBFx").unwrap(), "x");
    }
}
