//! Tensor archive (`.tza`) reader and writer.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! header  u16 magic (0x41D7) | u8 major (2) | u8 minor | u64 table offset
//! table   u32 count, then per tensor:
//!         u16 name length | name | u8 ndims | ndims x u32 shape
//!         | ndims layout bytes | u8 dtype ('f' or 'h') | u64 data offset
//! ```

use std::{collections::BTreeMap, path::Path};

use burn::tensor::f16;

use crate::error::{DenoiseError, Result};

pub const MAGIC: u16 = 0x41D7;
pub const MAJOR_VERSION: u8 = 2;
const HEADER_LEN: usize = 12;

/// A tensor decoded to `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct TzaTensor {
    pub shape: Vec<usize>,
    /// One character per dimension, e.g. `oihw` for convolution weights.
    pub layout: String,
    pub data: Vec<f32>,
}

impl TzaTensor {
    pub fn new(shape: Vec<usize>, layout: impl Into<String>, data: Vec<f32>) -> Result<Self> {
        let layout = layout.into();
        if layout.len() != shape.len() {
            return Err(DenoiseError::Weights(format!(
                "layout `{layout}` does not describe {} dimensions",
                shape.len()
            )));
        }
        if element_count(&shape)? != data.len() {
            return Err(DenoiseError::Weights(format!(
                "shape {shape:?} does not hold {} elements",
                data.len()
            )));
        }
        Ok(Self {
            shape,
            layout,
            data,
        })
    }
}

/// Named tensors of one weights blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorArchive {
    tensors: BTreeMap<String, TzaTensor>,
}

impl TensorArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let archive = Self::parse(&bytes)?;
        tracing::info!(
            "read {} tensors from {}",
            archive.len(),
            path.as_ref().display()
        );
        Ok(archive)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut header = Reader::new(bytes, 0);
        if header.u16()? != MAGIC {
            return Err(DenoiseError::Weights("invalid or corrupted weights blob".into()));
        }
        let major = header.u8()?;
        let _minor = header.u8()?;
        if major != MAJOR_VERSION {
            return Err(DenoiseError::Weights(format!(
                "unsupported weights blob version {major}"
            )));
        }
        let table_offset = header.offset()?;

        let mut table = Reader::new(bytes, table_offset);
        let count = table.u32()?;
        let mut archive = Self::new();

        for _ in 0..count {
            let name_len = usize::from(table.u16()?);
            let name = String::from_utf8(table.bytes(name_len)?.to_vec())
                .map_err(|_| DenoiseError::Weights("tensor name is not UTF-8".into()))?;

            let ndims = usize::from(table.u8()?);
            let shape = (0..ndims)
                .map(|_| table.u32().map(|dim| dim as usize))
                .collect::<Result<Vec<_>>>()?;
            let layout = String::from_utf8_lossy(table.bytes(ndims)?).into_owned();
            let dtype = table.u8()?;
            let data_offset = table.offset()?;

            let len = element_count(&shape)?;
            let mut data = Reader::new(bytes, data_offset);
            let values = match dtype {
                b'f' => data
                    .bytes(byte_len(len, 4)?)?
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                b'h' => data
                    .bytes(byte_len(len, 2)?)?
                    .chunks_exact(2)
                    .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                    .collect(),
                other => {
                    return Err(DenoiseError::Weights(format!(
                        "tensor `{name}` has unknown data type `{}`",
                        other as char
                    )))
                }
            };

            archive.insert(name, TzaTensor::new(shape, layout, values)?);
        }

        Ok(archive)
    }

    /// Encodes the archive with `f32` data.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for tensor in self.tensors.values() {
            offsets.push(HEADER_LEN + data.len());
            for value in &tensor.data {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        let table_offset = HEADER_LEN + data.len();
        let mut out = Vec::with_capacity(table_offset + 64 * self.tensors.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(MAJOR_VERSION);
        out.push(0);
        out.extend_from_slice(&(table_offset as u64).to_le_bytes());
        out.extend_from_slice(&data);

        out.extend_from_slice(&to_u32(self.tensors.len(), "tensor count")?.to_le_bytes());
        for ((name, tensor), offset) in self.tensors.iter().zip(offsets) {
            let name_len = u16::try_from(name.len())
                .map_err(|_| DenoiseError::Weights(format!("tensor name `{name}` is too long")))?;
            let ndims = u8::try_from(tensor.shape.len()).map_err(|_| {
                DenoiseError::Weights(format!("tensor `{name}` has too many dimensions"))
            })?;

            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(ndims);
            for dim in &tensor.shape {
                out.extend_from_slice(&to_u32(*dim, "dimension")?.to_le_bytes());
            }
            out.extend_from_slice(tensor.layout.as_bytes());
            out.push(b'f');
            out.extend_from_slice(&(offset as u64).to_le_bytes());
        }

        Ok(out)
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: TzaTensor) -> Option<TzaTensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&TzaTensor> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, dim| count.checked_mul(*dim))
        .ok_or_else(|| DenoiseError::Weights(format!("tensor shape {shape:?} is too large")))
}

fn byte_len(elements: usize, width: usize) -> Result<usize> {
    elements
        .checked_mul(width)
        .ok_or_else(|| DenoiseError::Weights(format!("{elements} elements exceed the address space")))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| DenoiseError::Weights(format!("{what} {value} exceeds u32")))
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                DenoiseError::Weights(format!(
                    "unexpected end of blob reading {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn offset(&mut self) -> Result<usize> {
        let offset = u64::from_le_bytes(self.array()?);
        usize::try_from(offset)
            .map_err(|_| DenoiseError::Weights(format!("offset {offset} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TensorArchive {
        let mut archive = TensorArchive::new();
        archive.insert(
            "enc_conv0.weight",
            TzaTensor::new(vec![2, 1, 1, 2], "oihw", vec![1.0, -2.0, 3.5, 0.25]).unwrap(),
        );
        archive.insert(
            "enc_conv0.bias",
            TzaTensor::new(vec![2], "x", vec![0.5, -0.5]).unwrap(),
        );
        archive
    }

    #[test]
    fn encoded_archive_parses_back() {
        let archive = sample();
        let bytes = archive.to_bytes().unwrap();

        assert_eq!(&bytes[..2], &MAGIC.to_le_bytes());
        assert_eq!(TensorArchive::parse(&bytes).unwrap(), archive);
    }

    #[test]
    fn decodes_half_precision_tensors() {
        // One tensor `b`, shape [3], layout `x`, dtype 'h', data right after the header.
        let values = [1.0f32, -2.0, 0.5];
        let mut blob = Vec::new();
        let data_offset = HEADER_LEN as u64;
        let table_offset = data_offset + 6;
        blob.extend_from_slice(&MAGIC.to_le_bytes());
        blob.extend_from_slice(&[2, 0]);
        blob.extend_from_slice(&table_offset.to_le_bytes());
        for v in values {
            blob.extend_from_slice(&f16::from_f32(v).to_bits().to_le_bytes());
        }
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.push(b'b');
        blob.push(1);
        blob.extend_from_slice(&3u32.to_le_bytes());
        blob.push(b'x');
        blob.push(b'h');
        blob.extend_from_slice(&data_offset.to_le_bytes());

        let archive = TensorArchive::parse(&blob).unwrap();
        let tensor = archive.get("b").unwrap();
        assert_eq!(tensor.shape, vec![3]);
        assert_eq!(tensor.data, values.to_vec());
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[2] = 1;
        assert!(matches!(
            TensorArchive::parse(&bytes),
            Err(DenoiseError::Weights(_))
        ));

        bytes[0] = 0;
        assert!(matches!(
            TensorArchive::parse(&bytes),
            Err(DenoiseError::Weights(_))
        ));
    }

    #[test]
    fn rejects_truncated_blob() {
        let bytes = sample().to_bytes().unwrap();
        for len in [0, 5, HEADER_LEN + 3, bytes.len() - 1] {
            assert!(
                matches!(
                    TensorArchive::parse(&bytes[..len]),
                    Err(DenoiseError::Weights(_))
                ),
                "truncated to {len}"
            );
        }
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&MAGIC.to_le_bytes());
        blob.extend_from_slice(&[2, 0]);
        blob.extend_from_slice(&(HEADER_LEN as u64).to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.push(b'w');
        blob.push(3);
        for _ in 0..3 {
            blob.extend_from_slice(&u32::MAX.to_le_bytes());
        }
        blob.extend_from_slice(b"xyz");
        blob.push(b'f');
        blob.extend_from_slice(&(HEADER_LEN as u64).to_le_bytes());

        assert!(matches!(
            TensorArchive::parse(&blob),
            Err(DenoiseError::Weights(_))
        ));
        assert!(TzaTensor::new(vec![usize::MAX, 2], "oi", Vec::new()).is_err());
    }

    #[test]
    fn tensor_shape_must_match_data() {
        assert!(TzaTensor::new(vec![2, 2], "oi", vec![1.0; 3]).is_err());
        assert!(TzaTensor::new(vec![2], "oi", vec![1.0; 2]).is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.tza");
        sample().write(&path).unwrap();

        assert_eq!(TensorArchive::read(&path).unwrap(), sample());
    }
}
