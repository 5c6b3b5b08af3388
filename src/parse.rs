//! Parsing for the literal forms the line-oriented front-end hands the
//! core: integers in decimal or 0x-hex, floats, and byte vectors written
//! as `[0xNN,0xNN,...]`.

use crate::error::{LdbgError, LdbgResult};

pub trait FromStrRadix: Sized {
    fn from_str_radix(src: &str, radix: u32) -> Result<Self, std::num::ParseIntError>;
}

macro_rules! impl_from_str_radix {
    ($($ty:ty)*) => {
        $(impl FromStrRadix for $ty {
            fn from_str_radix(src: &str, radix: u32) -> Result<Self, std::num::ParseIntError> {
                <$ty>::from_str_radix(src, radix)
            }
        })*
    };
}

impl_from_str_radix!(u8 u16 u32 u64 i8 i16 i32 i64);

/// Parse an integer literal, hex with a `0x` prefix or plain decimal.
pub fn to_integral<T: FromStrRadix>(text: &str) -> LdbgResult<T> {
    let text = text.trim();
    let (digits, radix) = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    T::from_str_radix(digits, radix)
        .map_err(|_| LdbgError::Parse(format!("invalid integer literal: {text}")))
}

pub fn to_float(text: &str) -> LdbgResult<f64> {
    text.trim()
        .parse()
        .map_err(|_| LdbgError::Parse(format!("invalid float literal: {text}")))
}

/// Parse a byte vector literal of the form `[0xNN,0xNN,...]`.
pub fn parse_vector(text: &str) -> LdbgResult<Vec<u8>> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| {
            LdbgError::Parse(format!("invalid vector literal: {text}"))
        })?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner.split(',').map(to_integral::<u8>).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers() {
        assert_eq!(to_integral::<u64>("0xcafecafe").unwrap(), 0xcafecafe);
        assert_eq!(to_integral::<u64>(" 42 ").unwrap(), 42);
        assert_eq!(to_integral::<i32>("-7").unwrap(), -7);
        assert_eq!(to_integral::<u8>("0xff").unwrap(), 0xff);
        assert!(to_integral::<u8>("0x100").is_err());
        assert!(to_integral::<u64>("pizza").is_err());
        assert!(matches!(
            to_integral::<u64>("12z"),
            Err(LdbgError::Parse(_))
        ));
    }

    #[test]
    fn floats() {
        assert_eq!(to_float("42.24").unwrap(), 42.24);
        assert!(to_float("4..2").is_err());
    }

    #[test]
    fn vectors() {
        assert_eq!(
            parse_vector("[0x48,0x65,0x6c]").unwrap(),
            vec![0x48, 0x65, 0x6c]
        );
        assert_eq!(parse_vector("[]").unwrap(), Vec::<u8>::new());
        assert!(parse_vector("0x48,0x65").is_err());
        assert!(parse_vector("[0x48,").is_err());
        assert!(parse_vector("[0xgg]").is_err());
    }
}
