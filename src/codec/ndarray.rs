//! Dense n-dimensional arrays stored in the NPY v1.0 format.
//!
//! Layout on disk: magic `\x93NUMPY`, version bytes, little-endian header
//! length, an ASCII header dict padded to a 64-byte boundary, then the raw
//! little-endian elements in C order.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

use super::{Storable, with_suffix};

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGN: usize = 64;

/// Element storage of an [`NdArray`], flattened in C order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// NumPy dtype descriptor.
    pub fn descr(&self) -> &'static str {
        match self {
            ArrayData::Bool(_) => "|b1",
            ArrayData::U8(_) => "|u1",
            ArrayData::I32(_) => "<i4",
            ArrayData::I64(_) => "<i8",
            ArrayData::F32(_) => "<f4",
            ArrayData::F64(_) => "<f8",
        }
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::Bool(v) => v.iter().map(|b| *b as u8).collect(),
            ArrayData::U8(v) => v.clone(),
            ArrayData::I32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            ArrayData::F64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    fn from_le_bytes(descr: &str, bytes: &[u8]) -> Result<Self> {
        macro_rules! decode {
            ($ty:ty, $variant:ident) => {{
                const N: usize = std::mem::size_of::<$ty>();
                if bytes.len() % N != 0 {
                    bail!("Array payload of {} bytes is not a multiple of {}", bytes.len(), N);
                }
                let values = bytes
                    .chunks_exact(N)
                    .map(|chunk| {
                        let mut buf = [0u8; N];
                        buf.copy_from_slice(chunk);
                        <$ty>::from_le_bytes(buf)
                    })
                    .collect();
                Ok(ArrayData::$variant(values))
            }};
        }

        match descr {
            "|b1" => Ok(ArrayData::Bool(bytes.iter().map(|b| *b != 0).collect())),
            "|u1" => Ok(ArrayData::U8(bytes.to_vec())),
            "<i4" => decode!(i32, I32),
            "<i8" => decode!(i64, I64),
            "<f4" => decode!(f32, F32),
            "<f8" => decode!(f64, F64),
            other => bail!("Unsupported array dtype '{}'", other),
        }
    }
}

/// An n-dimensional array: a shape plus flattened element data.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl Storable for NdArray {
    const TYPE_NAME: &'static str = "ndarray";
}

impl NdArray {
    /// Build an array, checking that the element count matches the shape.
    /// An empty shape is a 0-d scalar holding exactly one element.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            bail!(
                "Shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            );
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [] => "()".to_string(),
        [n] => format!("({},)", n),
        dims => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

fn header_for(array: &NdArray) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        array.data.descr(),
        shape_literal(&array.shape)
    );
    // magic(6) + version(2) + len(2) + header + '\n' must be a multiple of ALIGN
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');
    header.into_bytes()
}

/// Write `array` as a `.npy` file. Appends `.npy` to the path.
pub fn write_npy(array: &NdArray, path: &Path) -> Result<PathBuf> {
    let path = with_suffix(path, "npy");
    let header = header_for(array);
    let header_len = u16::try_from(header.len()).context("NPY header too large")?;

    let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + header.len() + array.data.len() * 8);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&header_len.to_le_bytes());
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&array.data.to_le_bytes());

    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Read a `.npy` file written by [`write_npy`] or by NumPy (v1/v2 headers,
/// little-endian, C order).
pub fn read_npy(path: &Path) -> Result<NdArray> {
    let path = with_suffix(path, "npy");
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
        bail!("{} is not an NPY file", path.display());
    }
    let major = bytes[6];
    let (header_start, header_len) = match major {
        1 => (10, u16::from_le_bytes([bytes[8], bytes[9]]) as usize),
        2 | 3 => {
            if bytes.len() < 12 {
                bail!("Truncated NPY header in {}", path.display());
            }
            (
                12,
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            )
        }
        v => bail!("Unsupported NPY version {}", v),
    };
    let data_start = header_start + header_len;
    if data_start > bytes.len() {
        bail!("Truncated NPY header in {}", path.display());
    }

    let header = std::str::from_utf8(&bytes[header_start..data_start])
        .context("NPY header is not valid text")?;
    let descr = quoted_field(header, "descr")?;
    if raw_field(header, "fortran_order")?.starts_with("True") {
        bail!("Fortran-ordered arrays are not supported");
    }
    let shape = parse_shape(raw_field(header, "shape")?)?;

    let data = ArrayData::from_le_bytes(descr, &bytes[data_start..])?;
    NdArray::new(shape, data)
}

/// Text following `'key':` in the header dict, left-trimmed.
fn raw_field<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let needle = format!("'{}':", key);
    let start = header
        .find(&needle)
        .with_context(|| format!("NPY header missing '{}'", key))?;
    Ok(header[start + needle.len()..].trim_start())
}

fn quoted_field<'a>(header: &'a str, key: &str) -> Result<&'a str> {
    let rest = raw_field(header, key)?;
    let rest = rest
        .strip_prefix('\'')
        .with_context(|| format!("NPY header field '{}' is not a string", key))?;
    let end = rest
        .find('\'')
        .with_context(|| format!("Unterminated '{}' in NPY header", key))?;
    Ok(&rest[..end])
}

fn parse_shape(rest: &str) -> Result<Vec<usize>> {
    let rest = rest.strip_prefix('(').context("NPY shape is not a tuple")?;
    let end = rest.find(')').context("Unterminated NPY shape")?;
    rest[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .with_context(|| format!("Bad NPY dimension '{}'", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned() {
        let array = NdArray::new(vec![2, 3], ArrayData::I64(vec![0; 6])).unwrap();
        let header = header_for(&array);
        assert_eq!((MAGIC.len() + 4 + header.len()) % ALIGN, 0);
        assert!(header.ends_with(b"\n"));
    }

    #[test]
    fn shape_literal_matches_python_tuples() {
        assert_eq!(shape_literal(&[]), "()");
        assert_eq!(shape_literal(&[4]), "(4,)");
        assert_eq!(shape_literal(&[2, 3, 1]), "(2, 3, 1)");
        assert_eq!(parse_shape("(4,), }").unwrap(), vec![4]);
        assert_eq!(parse_shape("(), }").unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn element_count_must_match_shape() {
        assert!(NdArray::new(vec![2, 2], ArrayData::F32(vec![1.0; 3])).is_err());
        assert!(NdArray::new(vec![], ArrayData::F64(vec![1.0])).is_ok());
    }

    #[test]
    fn npy_round_trip_per_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let cases = vec![
            NdArray::new(vec![3], ArrayData::Bool(vec![true, false, true])).unwrap(),
            NdArray::new(vec![2, 2], ArrayData::U8(vec![0, 1, 254, 255])).unwrap(),
            NdArray::new(vec![1, 3], ArrayData::I32(vec![-7, 0, i32::MAX])).unwrap(),
            NdArray::new(vec![2, 1, 2], ArrayData::I64(vec![i64::MIN, 1, 2, 3])).unwrap(),
            NdArray::new(vec![], ArrayData::F32(vec![0.25])).unwrap(),
            NdArray::new(vec![2, 3], ArrayData::F64(vec![0.1, -2.5, 1e300, 0.0, -0.0, 3.0]))
                .unwrap(),
        ];

        for (i, array) in cases.into_iter().enumerate() {
            let stored = write_npy(&array, &dir.path().join(format!("a{}", i))).unwrap();
            let back = read_npy(&stored).unwrap();
            assert_eq!(back.shape(), array.shape());
            assert_eq!(back.data().descr(), array.data().descr());
            assert_eq!(back, array);
        }
    }
}
