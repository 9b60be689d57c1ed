//! ESRF Data Format (EDF) images.
//!
//! An EDF file starts with an ASCII header enclosed in `{` and `}\n`, holding
//! `key = value ;` pairs, followed by the raw pixel block. The header usually
//! occupies exactly 1024 bytes; other sizes are accepted and logged.
//! Files ending in `.gz` are inflated in memory before decoding.
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use giwaxs_core::image::rot90;
use flate2::read::GzDecoder;
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use crate::reader::MappedFileReader;
use crate::{Error, Result};

/// Conventional header block size.
pub const HEADER_BLOCK: usize = 1024;

/// Pixel types that may appear as `DataType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdfDataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl EdfDataType {
    /// Bytes per pixel.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    /// Canonical header name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "SignedByte",
            Self::U8 => "UnsignedByte",
            Self::I16 => "SignedShort",
            Self::U16 => "UnsignedShort",
            Self::I32 => "SignedInteger",
            Self::U32 => "UnsignedInteger",
            Self::I64 => "Signed64",
            Self::U64 => "Unsigned64",
            Self::F32 => "FloatValue",
            Self::F64 => "DoubleValue",
        }
    }

    /// Decodes one pixel; `chunk` must hold exactly [`width`](Self::width) bytes.
    fn decode(self, chunk: &[u8], order: ByteOrder) -> f64 {
        let n = chunk.len().min(8);
        let mut b = [0_u8; 8];
        b[..n].copy_from_slice(&chunk[..n]);
        if order == ByteOrder::HighByteFirst {
            b[..n].reverse();
        }
        match self {
            Self::I8 => f64::from(i8::from_le_bytes([b[0]])),
            Self::U8 => f64::from(b[0]),
            Self::I16 => f64::from(i16::from_le_bytes([b[0], b[1]])),
            Self::U16 => f64::from(u16::from_le_bytes([b[0], b[1]])),
            Self::I32 => f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::U32 => f64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::I64 => i64::from_le_bytes(b) as f64,
            Self::U64 => u64::from_le_bytes(b) as f64,
            Self::F32 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::F64 => f64::from_le_bytes(b),
        }
    }
}

impl FromStr for EdfDataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SIGNEDBYTE" => Ok(Self::I8),
            "UNSIGNEDBYTE" => Ok(Self::U8),
            "SIGNEDSHORT" => Ok(Self::I16),
            "UNSIGNEDSHORT" => Ok(Self::U16),
            "SIGNEDINTEGER" | "SIGNEDLONG" => Ok(Self::I32),
            "UNSIGNEDINTEGER" | "UNSIGNEDLONG" => Ok(Self::U32),
            "SIGNED64" => Ok(Self::I64),
            "UNSIGNED64" => Ok(Self::U64),
            "FLOATVALUE" | "FLOAT" => Ok(Self::F32),
            "DOUBLEVALUE" => Ok(Self::F64),
            _ => Err(Error::UnknownDataType(s.to_string())),
        }
    }
}

/// Pixel byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    LowByteFirst,
    HighByteFirst,
}

impl FromStr for ByteOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LowByteFirst" => Ok(Self::LowByteFirst),
            "HighByteFirst" => Ok(Self::HighByteFirst),
            other => Err(Error::InvalidFormat(format!("unknown ByteOrder {other}"))),
        }
    }
}

/// Parsed EDF header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdfHeader {
    entries: BTreeMap<String, String>,
    size: usize,
}

impl EdfHeader {
    /// Parses the header at the start of `data`.
    ///
    /// Whitespace inside keys and values is dropped; items that are not a
    /// single `key=value` pair are ignored.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the data does not start with `{`,
    /// the closing `}\n` is missing, or the header is not UTF-8.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&b'{') {
            return Err(Error::InvalidFormat("EDF header must start with `{`".into()));
        }
        let end = data
            .windows(2)
            .position(|w| w == b"}\n")
            .map(|pos| pos + 2)
            .ok_or_else(|| Error::InvalidFormat("EDF header is not terminated".into()))?;
        if end != HEADER_BLOCK {
            info!("file has unusual header size of {end} bytes");
        }
        let text = std::str::from_utf8(&data[1..end])
            .map_err(|e| Error::InvalidFormat(format!("EDF header is not UTF-8: {e}")))?;
        let cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '{' && *c != '}')
            .collect();

        let entries = cleaned
            .split(';')
            .filter_map(|item| {
                let mut parts = item.split('=');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(key), Some(value), None) => Some((key.to_string(), value.to_string())),
                    _ => None,
                }
            })
            .collect();
        Ok(Self { entries, size: end })
    }

    /// Header length in bytes, up to and including `}\n`.
    #[must_use]
    pub fn header_size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Pixel type.
    ///
    /// # Errors
    /// Returns an error if `DataType` is absent or unknown.
    pub fn data_type(&self) -> Result<EdfDataType> {
        self.get("DataType")
            .ok_or(Error::MissingHeaderKey("DataType"))?
            .parse()
    }

    /// Pixel byte order; `LowByteFirst` when absent.
    ///
    /// # Errors
    /// Returns an error for an unknown `ByteOrder`.
    pub fn byte_order(&self) -> Result<ByteOrder> {
        self.get("ByteOrder").map_or(Ok(ByteOrder::default()), str::parse)
    }

    /// Stored shape `(Dim_2, Dim_1)`, row-major.
    ///
    /// # Errors
    /// Returns an error if a dimension is absent or not an integer.
    pub fn shape(&self) -> Result<(usize, usize)> {
        Ok((self.dimension("Dim_2")?, self.dimension("Dim_1")?))
    }

    fn dimension(&self, key: &'static str) -> Result<usize> {
        let value = self.get(key).ok_or(Error::MissingHeaderKey(key))?;
        value
            .parse()
            .map_err(|_| Error::InvalidFormat(format!("{key} = {value} is not a dimension")))
    }
}

/// Decoded EDF image.
#[derive(Debug, Clone, PartialEq)]
pub struct EdfImage {
    pub header: EdfHeader,
    pub data: Array2<f64>,
}

/// Decodes an in-memory EDF file.
///
/// With `rotate`, the stored array is turned 90 degrees counter-clockwise,
/// the orientation used for display and analysis.
///
/// # Errors
/// Returns an error for a malformed header or a truncated pixel block.
pub fn parse_edf(data: &[u8], rotate: bool) -> Result<EdfImage> {
    let header = EdfHeader::parse(data)?;
    let dtype = header.data_type()?;
    let order = header.byte_order()?;
    let (rows, cols) = header.shape()?;

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(dtype.width()))
        .ok_or_else(|| {
            Error::InvalidFormat(format!("EDF shape {rows}x{cols} overflows the address space"))
        })?;
    let start = header.header_size();
    let available = data.len() - start;
    if available < expected {
        return Err(Error::InvalidFormat(format!(
            "EDF pixel block holds {available} bytes, {rows}x{cols} {} needs {expected}",
            dtype.name()
        )));
    }
    let pixels: Vec<f64> = data[start..start + expected]
        .par_chunks_exact(dtype.width())
        .map(|chunk| dtype.decode(chunk, order))
        .collect();
    let stored = Array2::from_shape_vec((rows, cols), pixels)
        .map_err(|e| Error::InvalidFormat(format!("EDF shape mismatch: {e}")))?;
    debug!("decoded {rows}x{cols} {} image", dtype.name());

    let data = if rotate { rot90(&stored) } else { stored };
    Ok(EdfImage { header, data })
}

/// Raw bytes behind an [`EdfReader`].
enum Source {
    Mapped(MappedFileReader),
    Inflated { path: PathBuf, bytes: Vec<u8> },
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(reader) => reader.as_bytes(),
            Self::Inflated { bytes, .. } => bytes,
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Mapped(reader) => reader.path(),
            Self::Inflated { path, .. } => path,
        }
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Reader for EDF files on disk, plain or gzip-compressed.
pub struct EdfReader {
    source: Source,
    rotate: bool,
}

impl EdfReader {
    /// Opens an EDF file. Images are rotated by default.
    ///
    /// Plain files are memory-mapped; `.gz` files are inflated into memory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, mapped or inflated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = if is_gzip(path) {
            let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
            let mut bytes = Vec::new();
            decoder.read_to_end(&mut bytes)?;
            info!("inflated {} to {} bytes", path.display(), bytes.len());
            Source::Inflated {
                path: path.to_path_buf(),
                bytes,
            }
        } else {
            Source::Mapped(MappedFileReader::open(path)?)
        };
        Ok(Self {
            source,
            rotate: true,
        })
    }

    /// Enables or disables the counter-clockwise rotation.
    #[must_use]
    pub fn with_rotation(mut self, rotate: bool) -> Self {
        self.rotate = rotate;
        self
    }

    /// Parses the header only.
    ///
    /// # Errors
    /// Returns an error for a malformed header.
    pub fn header(&self) -> Result<EdfHeader> {
        EdfHeader::parse(self.source.bytes())
    }

    /// Decodes the image.
    ///
    /// # Errors
    /// Returns an error for a malformed file; the path is included.
    pub fn read(&self) -> Result<EdfImage> {
        parse_edf(self.source.bytes(), self.rotate).map_err(|err| match err {
            Error::InvalidFormat(msg) => {
                Error::InvalidFormat(format!("{msg} (file: {})", self.source.path().display()))
            }
            other => other,
        })
    }
}

/// Reads and rotates an EDF image, inflating `.gz` files.
///
/// # Errors
/// See [`EdfReader::read`].
pub fn read_edf<P: AsRef<Path>>(path: P) -> Result<EdfImage> {
    EdfReader::open(path)?.read()
}

/// Writes `image` as a little-endian `DoubleValue` EDF with a 1024-byte
/// header. The array is stored as given; read it back without rotation to
/// get the same array.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_edf<P: AsRef<Path>>(path: P, image: &Array2<f64>) -> Result<()> {
    let (rows, cols) = image.dim();
    let size = rows * cols * EdfDataType::F64.width();
    let mut header = format!(
        "{{\nHeaderID = EH:000001:000000:000000 ;\nByteOrder = LowByteFirst ;\n\
         DataType = {} ;\nDim_1 = {cols} ;\nDim_2 = {rows} ;\nSize = {size} ;\n",
        EdfDataType::F64.name()
    );
    let padding = HEADER_BLOCK.saturating_sub(header.len() + 2);
    header.push_str(&" ".repeat(padding));
    header.push_str("}\n");

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(header.as_bytes())?;
    for value in image {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn edf_bytes(header: &str, pixels: &[u8]) -> Vec<u8> {
        let mut text = format!("{{\n{header}");
        text.push_str(&" ".repeat(HEADER_BLOCK - text.len() - 2));
        text.push_str("}\n");
        let mut data = text.into_bytes();
        data.extend_from_slice(pixels);
        data
    }

    #[test]
    fn test_header_entries() {
        let data = edf_bytes(
            "DataType = UnsignedShort ;\nDim_1 = 3 ;\nDim_2 = 2 ;\nTitle = a b ;\n",
            &[],
        );
        let header = EdfHeader::parse(&data).unwrap();
        assert_eq!(header.header_size(), HEADER_BLOCK);
        assert_eq!(header.data_type().unwrap(), EdfDataType::U16);
        assert_eq!(header.byte_order().unwrap(), ByteOrder::LowByteFirst);
        assert_eq!(header.shape().unwrap(), (2, 3));
        assert_eq!(header.get("Title"), Some("ab"));
    }

    #[test]
    fn test_unterminated_header() {
        assert!(matches!(
            EdfHeader::parse(b"{\nDim_1 = 3 ;"),
            Err(Error::InvalidFormat(_))
        ));
        assert!(EdfHeader::parse(b"Dim_1 = 3 ;}\n").is_err());
    }

    #[test]
    fn test_decodes_big_endian_shorts_without_rotation() {
        let data = edf_bytes(
            "ByteOrder = HighByteFirst ;\nDataType = SignedShort ;\nDim_1 = 2 ;\nDim_2 = 2 ;\n",
            &[0, 1, 0, 2, 0xff, 0xff, 1, 0],
        );
        let image = parse_edf(&data, false).unwrap();
        assert_eq!(image.data, array![[1.0, 2.0], [-1.0, 256.0]]);
    }

    #[test]
    fn test_rotation_is_counter_clockwise() {
        let data = edf_bytes(
            "DataType = UnsignedByte ;\nDim_1 = 3 ;\nDim_2 = 2 ;\n",
            &[1, 2, 3, 4, 5, 6],
        );
        let image = parse_edf(&data, true).unwrap();
        assert_eq!(image.data, array![[3.0, 6.0], [2.0, 5.0], [1.0, 4.0]]);
    }

    #[test]
    fn test_truncated_pixels() {
        let data = edf_bytes("DataType = FloatValue ;\nDim_1 = 2 ;\nDim_2 = 2 ;\n", &[0; 12]);
        assert!(matches!(parse_edf(&data, false), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_unknown_data_type() {
        let data = edf_bytes("DataType = Complex ;\nDim_1 = 1 ;\nDim_2 = 1 ;\n", &[0; 8]);
        assert!(matches!(
            parse_edf(&data, false),
            Err(Error::UnknownDataType(name)) if name == "Complex"
        ));
    }

    #[test]
    fn test_write_then_read_file() {
        let file = NamedTempFile::new().unwrap();
        let image = array![[0.5, -1.0, 2.0], [3.0, 4.25, 1e6]];
        write_edf(file.path(), &image).unwrap();

        let reader = EdfReader::open(file.path()).unwrap().with_rotation(false);
        assert_eq!(reader.header().unwrap().header_size(), HEADER_BLOCK);
        assert_eq!(reader.read().unwrap().data, image);
        assert_eq!(read_edf(file.path()).unwrap().data, rot90(&image));
    }

    #[test]
    fn test_oversized_dimensions_are_rejected() {
        let data = edf_bytes(
            "DataType = DoubleValue ;\nDim_1 = 4294967296 ;\nDim_2 = 4294967296 ;\n",
            &[0; 8],
        );
        assert!(matches!(parse_edf(&data, false), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_reads_gzip_compressed_file() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("frame.edf");
        let image = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.5]];
        write_edf(&plain, &image).unwrap();

        let packed = dir.path().join("frame.edf.gz");
        let mut encoder = GzEncoder::new(File::create(&packed).unwrap(), Compression::default());
        encoder.write_all(&std::fs::read(&plain).unwrap()).unwrap();
        encoder.finish().unwrap();

        let reader = EdfReader::open(&packed).unwrap().with_rotation(false);
        assert_eq!(reader.header().unwrap().shape().unwrap(), (3, 2));
        assert_eq!(reader.read().unwrap().data, image);
        assert_eq!(read_edf(&packed).unwrap().data, rot90(&image));
    }

    #[test]
    fn test_corrupt_gzip_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.edf.gz");
        std::fs::write(&path, b"{\nnot gzip\n}\n").unwrap();
        assert!(matches!(EdfReader::open(&path), Err(Error::Io(_))));
    }
}
