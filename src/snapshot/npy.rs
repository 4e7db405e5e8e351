//! Minimal NumPy `.npy` codec for one dimensional `float64` arrays.
//!
//! Writes format version 1.0 with a little-endian `<f8` payload, reads
//! versions 1.0 and 2.0. Anything else is reported as malformed.

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGNMENT: usize = 64;

/// Encode `values` as a complete `.npy` file.
pub fn encode(values: &[f64]) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    // magic + version + u16 length + header + '\n' is a multiple of ALIGNMENT
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGNMENT - unpadded % ALIGNMENT) % ALIGNMENT;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + header.len() + values.len() * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    if cfg!(target_endian = "little") {
        bytes.extend_from_slice(bytemuck::cast_slice(values));
    } else {
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    bytes
}

/// Decode a `.npy` file holding a 1-D little-endian `float64` array.
/// The error string describes what is wrong with the input.
pub fn decode(bytes: &[u8]) -> Result<Vec<f64>, String> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err("missing .npy magic".to_string());
    }
    let major = bytes[MAGIC.len()];
    let (header_len, header_start) = match major {
        1 => {
            let raw = bytes
                .get(8..10)
                .ok_or_else(|| "truncated header length".to_string())?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
        }
        2 => {
            let raw = bytes
                .get(8..12)
                .ok_or_else(|| "truncated header length".to_string())?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                12,
            )
        }
        other => return Err(format!("unsupported format version {other}")),
    };
    let header_bytes = bytes
        .get(header_start..header_start + header_len)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = std::str::from_utf8(header_bytes).map_err(|e| format!("header is not text: {e}"))?;

    let descr = header_value(header, "descr")?;
    if descr != "'<f8'" {
        return Err(format!("unsupported dtype {descr}"));
    }
    let fortran_order = header_value(header, "fortran_order")?;
    if fortran_order != "False" {
        return Err("fortran order arrays are not supported".to_string());
    }
    let len = parse_shape(header_value(header, "shape")?)?;

    let payload = &bytes[header_start + header_len..];
    let needed = len
        .checked_mul(8)
        .ok_or_else(|| "shape overflows payload".to_string())?;
    if payload.len() != needed {
        return Err(format!(
            "payload holds {} bytes, shape needs {needed}",
            payload.len()
        ));
    }
    let mut values = vec![0.0f64; len];
    bytemuck::cast_slice_mut::<f64, u8>(&mut values).copy_from_slice(payload);
    if cfg!(target_endian = "big") {
        for v in values.iter_mut() {
            *v = f64::from_bits(u64::from_le(v.to_bits()));
        }
    }
    Ok(values)
}

/// Raw text of `'key': value` in the header dictionary.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str, String> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .ok_or_else(|| format!("header has no '{key}'"))?
        + pattern.len();
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')').map(|i| i + 1)
    } else {
        rest.find([',', '}'])
    }
    .ok_or_else(|| format!("unterminated value for '{key}'"))?;
    Ok(rest[..end].trim())
}

fn parse_shape(shape: &str) -> Result<usize, String> {
    let inner = shape
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| format!("bad shape {shape}"))?;
    let dims: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    match dims.as_slice() {
        [len] => len
            .parse::<usize>()
            .map_err(|e| format!("bad shape {shape}: {e}")),
        _ => Err(format!("expected a 1-D array, got shape {shape}")),
    }
}
