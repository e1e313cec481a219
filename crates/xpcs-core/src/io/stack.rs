use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::consts::{STACK_FORMAT_VERSION, STACK_HEADER_SIZE, STACK_MAGIC};
use crate::error::{Result, XpcsError};

/// Storage type of the samples in a frame stack file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    U32,
    F32,
}

impl SampleType {
    pub fn byte_size(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 => 2,
            SampleType::U32 | SampleType::F32 => 4,
        }
    }

    fn code(self) -> u8 {
        match self {
            SampleType::U8 => 0,
            SampleType::U16 => 1,
            SampleType::U32 => 2,
            SampleType::F32 => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(SampleType::U8),
            1 => Ok(SampleType::U16),
            2 => Ok(SampleType::U32),
            3 => Ok(SampleType::F32),
            other => Err(XpcsError::InvalidStack(format!(
                "unknown sample type code {other}"
            ))),
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::U8 => write!(f, "u8"),
            SampleType::U16 => write!(f, "u16"),
            SampleType::U32 => write!(f, "u32"),
            SampleType::F32 => write!(f, "f32"),
        }
    }
}

/// Frame stack file header (32 bytes, little-endian).
///
/// | offset | size | field        |
/// |--------|------|--------------|
/// | 0      | 8    | magic        |
/// | 8      | 4    | version      |
/// | 12     | 4    | frame count  |
/// | 16     | 4    | rows         |
/// | 20     | 4    | cols         |
/// | 24     | 1    | sample type  |
/// | 25     | 7    | reserved     |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackHeader {
    pub version: u32,
    pub n_frames: u32,
    pub rows: u32,
    pub cols: u32,
    pub sample_type: SampleType,
}

impl StackHeader {
    pub fn frame_byte_size(&self) -> usize {
        self.rows as usize * self.cols as usize * self.sample_type.byte_size()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows as usize, self.cols as usize)
    }
}

/// Sample types a stack can be written with.
pub trait StackSample: Copy {
    const SAMPLE_TYPE: SampleType;

    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()>;
}

impl StackSample for u8 {
    const SAMPLE_TYPE: SampleType = SampleType::U8;

    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_u8(self)
    }
}

impl StackSample for u16 {
    const SAMPLE_TYPE: SampleType = SampleType::U16;

    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_u16::<LittleEndian>(self)
    }
}

impl StackSample for u32 {
    const SAMPLE_TYPE: SampleType = SampleType::U32;

    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self)
    }
}

impl StackSample for f32 {
    const SAMPLE_TYPE: SampleType = SampleType::F32;

    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self)
    }
}

/// Memory-mapped frame stack reader.
pub struct StackReader {
    mmap: Mmap,
    pub header: StackHeader,
}

impl StackReader {
    /// Open a stack file and validate its header against the file size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the map is read-only and the file is not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < STACK_HEADER_SIZE {
            return Err(XpcsError::InvalidStack(
                "file too small for stack header".into(),
            ));
        }
        let header = parse_header(&mmap[..STACK_HEADER_SIZE])?;

        let expected = STACK_HEADER_SIZE + header.frame_byte_size() * header.n_frames as usize;
        if mmap.len() != expected {
            return Err(XpcsError::InvalidStack(format!(
                "expected {expected} bytes for {} frames of {}x{} {}, got {}",
                header.n_frames,
                header.rows,
                header.cols,
                header.sample_type,
                mmap.len()
            )));
        }

        tracing::debug!(
            path = %path.display(),
            n_frames = header.n_frames,
            rows = header.rows,
            cols = header.cols,
            sample_type = %header.sample_type,
            "opened frame stack"
        );
        Ok(Self { mmap, header })
    }

    pub fn frame_count(&self) -> usize {
        self.header.n_frames as usize
    }

    /// Raw little-endian bytes of one frame, borrowed from the map.
    pub fn frame_raw(&self, index: usize) -> Result<&[u8]> {
        let count = self.frame_count();
        if index >= count {
            return Err(XpcsError::InvalidStack(format!(
                "frame index {index} out of range (stack has {count} frames)"
            )));
        }
        let size = self.header.frame_byte_size();
        let offset = STACK_HEADER_SIZE + index * size;
        Ok(&self.mmap[offset..offset + size])
    }

    /// Decode one frame to `f32`. `u32` samples above 2^24 lose precision.
    pub fn read_frame(&self, index: usize) -> Result<Array2<f32>> {
        let raw = self.frame_raw(index)?;
        let values = decode_samples(raw, self.header.sample_type);
        Array2::from_shape_vec(self.header.shape(), values)
            .map_err(|e| XpcsError::InvalidStack(e.to_string()))
    }

    /// Decode the whole stack as `(n_frames, rows, cols)`.
    pub fn read_all(&self) -> Result<Array3<f32>> {
        let (rows, cols) = self.header.shape();
        let mut frames = Array3::<f32>::zeros((self.frame_count(), rows, cols));
        for (i, mut slot) in frames.axis_iter_mut(Axis(0)).enumerate() {
            slot.assign(&self.read_frame(i)?);
        }
        Ok(frames)
    }
}

/// Write `frames` (`(n_frames, rows, cols)`) as a stack file.
pub fn write_stack<S: StackSample>(path: &Path, frames: ArrayView3<'_, S>) -> Result<()> {
    let (n_frames, rows, cols) = frames.dim();
    let header = StackHeader {
        version: STACK_FORMAT_VERSION,
        n_frames: to_u32(n_frames, "frame count")?,
        rows: to_u32(rows, "row count")?,
        cols: to_u32(cols, "column count")?,
        sample_type: S::SAMPLE_TYPE,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, &header)?;
    for &sample in frames.iter() {
        sample.write_le(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn parse_header(buf: &[u8]) -> Result<StackHeader> {
    if &buf[..STACK_MAGIC.len()] != STACK_MAGIC {
        return Err(XpcsError::InvalidStack("missing XPCSSTK1 magic".into()));
    }
    let mut cursor = std::io::Cursor::new(&buf[STACK_MAGIC.len()..]);
    let version = cursor.read_u32::<LittleEndian>()?;
    let n_frames = cursor.read_u32::<LittleEndian>()?;
    let rows = cursor.read_u32::<LittleEndian>()?;
    let cols = cursor.read_u32::<LittleEndian>()?;
    let sample_type = SampleType::from_code(cursor.read_u8()?)?;

    if version != STACK_FORMAT_VERSION {
        return Err(XpcsError::InvalidStack(format!(
            "unsupported format version {version}"
        )));
    }
    if n_frames == 0 || rows == 0 || cols == 0 {
        return Err(XpcsError::InvalidStack(format!(
            "empty stack ({n_frames} frames of {rows}x{cols})"
        )));
    }

    Ok(StackHeader {
        version,
        n_frames,
        rows,
        cols,
        sample_type,
    })
}

fn write_header(w: &mut impl Write, header: &StackHeader) -> Result<()> {
    w.write_all(STACK_MAGIC)?;
    w.write_u32::<LittleEndian>(header.version)?;
    w.write_u32::<LittleEndian>(header.n_frames)?;
    w.write_u32::<LittleEndian>(header.rows)?;
    w.write_u32::<LittleEndian>(header.cols)?;
    w.write_u8(header.sample_type.code())?;
    w.write_all(&[0u8; 7])?;
    Ok(())
}

fn decode_samples(raw: &[u8], sample_type: SampleType) -> Vec<f32> {
    let count = raw.len() / sample_type.byte_size();
    match sample_type {
        SampleType::U8 => raw.iter().map(|&v| v as f32).collect(),
        SampleType::U16 => {
            let mut buf = vec![0u16; count];
            LittleEndian::read_u16_into(raw, &mut buf);
            buf.into_iter().map(f32::from).collect()
        }
        SampleType::U32 => {
            let mut buf = vec![0u32; count];
            LittleEndian::read_u32_into(raw, &mut buf);
            buf.into_iter().map(|v| v as f32).collect()
        }
        SampleType::F32 => {
            let mut buf = vec![0f32; count];
            LittleEndian::read_f32_into(raw, &mut buf);
            buf
        }
    }
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| XpcsError::InvalidStack(format!("{what} {value} does not fit the header")))
}
