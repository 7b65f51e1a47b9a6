// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Unit encodings.
//!
//! The binary form is a four byte header (`WVU` magic plus a format version)
//! followed by a bincode payload. A pretty-printed JSON form is accepted for
//! hand-written fixtures and inspection.

use std::path::Path;

use crate::error::CodecError;

use super::ClassUnit;

/// Magic bytes at the start of every binary unit.
pub const MAGIC: [u8; 3] = *b"WVU";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1;

/// Encode a unit to its binary form.
pub fn encode(unit: &ClassUnit) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(unit)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a unit from its binary form.
pub fn decode(bytes: &[u8]) -> Result<ClassUnit, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated(bytes.len()));
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    Ok(bincode::deserialize(&bytes[HEADER_LEN..])?)
}

/// Check whether bytes carry the binary unit header.
pub fn is_binary_unit(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN && bytes[..MAGIC.len()] == MAGIC
}

/// Render a unit as pretty JSON.
pub fn to_json(unit: &ClassUnit) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(unit)?)
}

/// Parse a unit from JSON.
pub fn from_json(text: &str) -> Result<ClassUnit, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Read a unit file (binary or JSON).
///
/// JSON is chosen by a `.json` extension; everything else must be binary.
pub fn read_unit_file(path: &Path) -> Result<ClassUnit, CodecError> {
    let bytes = std::fs::read(path)?;
    if is_json_path(path) {
        let text = String::from_utf8(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
        from_json(&text)
    } else {
        decode(&bytes)
    }
}

/// Write a unit file, choosing the encoding from the extension.
pub fn write_unit_file(path: &Path, unit: &ClassUnit) -> Result<(), CodecError> {
    if is_json_path(path) {
        std::fs::write(path, to_json(unit)?)?;
    } else {
        std::fs::write(path, encode(unit)?)?;
    }
    Ok(())
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AccessFlags, ClassBuilder, Insn, MethodBuilder};
    use tempfile::TempDir;

    fn sample() -> ClassUnit {
        let mut mb = MethodBuilder::new(AccessFlags::PUBLIC | AccessFlags::STATIC, "answer", "()I");
        mb.emit(Insn::iconst(42)).emit(Insn::Return(Some(crate::unit::Kind::Int)));
        ClassBuilder::new("com/acme/Answer").method(mb.build()).build()
    }

    #[test]
    fn test_encode_has_header() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(&bytes[..3], b"WVU");
        assert_eq!(bytes[3], FORMAT_VERSION);
        assert!(is_binary_unit(&bytes));
    }

    #[test]
    fn test_decode_restores_unit() {
        let unit = sample();
        let decoded = decode(&encode(&unit).unwrap()).unwrap();
        assert_eq!(decoded, unit);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"WV"), Err(CodecError::Truncated(2))));
        assert!(matches!(decode(b"CAFEBABE"), Err(CodecError::BadMagic)));
        assert!(matches!(
            decode(&[b'W', b'V', b'U', 9, 0]),
            Err(CodecError::UnsupportedVersion(9))
        ));
        assert!(matches!(
            decode(&[b'W', b'V', b'U', FORMAT_VERSION, 0xff]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_unit_files_by_extension() {
        let temp = TempDir::new().unwrap();
        let unit = sample();

        let json_path = temp.path().join("Answer.json");
        write_unit_file(&json_path, &unit).unwrap();
        let text = std::fs::read_to_string(&json_path).unwrap();
        assert!(text.contains("com/acme/Answer"));
        assert_eq!(read_unit_file(&json_path).unwrap(), unit);

        let bin_path = temp.path().join("Answer.wvu");
        write_unit_file(&bin_path, &unit).unwrap();
        assert!(is_binary_unit(&std::fs::read(&bin_path).unwrap()));
        assert_eq!(read_unit_file(&bin_path).unwrap(), unit);
    }
}
