//! nom-based decode layer.
//!
//! Chunks are read strictly in container order; every field either yields its
//! exact byte count or fails with an error naming the field, and every
//! identifier and size invariant is checked where the field is read.

use std::fmt;

use nom::{
    bytes::complete::take,
    number::complete::{le_u16, le_u32},
    Err, IResult, Parser,
};

use crate::container::{
    ExtensibleFormat, FactChunk, Format, FormatExtension, FormatKind, WaveFile, WaveHeader,
    EXTENSION_SIZE_EXTENSIBLE, FACT_CHUNK_SIZE,
};

/// Fields of the container, in wire order, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    RiffId,
    RiffSize,
    RiffFormat,
    FormatId,
    FormatSize,
    AudioFormat,
    Channels,
    SampleRate,
    ByteRate,
    BlockAlign,
    BitsPerSample,
    ExtensionSize,
    ValidBitsPerSample,
    ChannelMask,
    SubFormat,
    FactId,
    FactSize,
    SampleLength,
    DataId,
    DataSize,
    AudioData,
    PadByte,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::RiffId => "riff chunk id",
            Field::RiffSize => "riff chunk size",
            Field::RiffFormat => "riff chunk format",
            Field::FormatId => "format sub-chunk id",
            Field::FormatSize => "format sub-chunk size",
            Field::AudioFormat => "format sub-chunk audio format",
            Field::Channels => "format sub-chunk number of channels",
            Field::SampleRate => "format sub-chunk sample rate",
            Field::ByteRate => "format sub-chunk byte rate",
            Field::BlockAlign => "format sub-chunk block align",
            Field::BitsPerSample => "format sub-chunk bits per sample",
            Field::ExtensionSize => "format sub-chunk extension size",
            Field::ValidBitsPerSample => "format sub-chunk valid bits per sample",
            Field::ChannelMask => "format sub-chunk channel mask",
            Field::SubFormat => "format sub-chunk sub-format",
            Field::FactId => "fact sub-chunk id",
            Field::FactSize => "fact sub-chunk size",
            Field::SampleLength => "fact sub-chunk sample length",
            Field::DataId => "data sub-chunk id",
            Field::DataSize => "data sub-chunk size",
            Field::AudioData => "data sub-chunk audio data",
            Field::PadByte => "data sub-chunk pad byte",
        };
        f.write_str(name)
    }
}

/// Every way a container can fail to decode, one variant per check.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("short read in {0}")]
    ShortRead(Field),
    #[error("reading wave container: {0}")]
    Io(#[from] std::io::Error),
    #[error("riff chunk id is not 'RIFF'")]
    RiffId,
    #[error("riff chunk format is not 'WAVE'")]
    RiffFormat,
    #[error("riff chunk size {declared} does not match the sub-chunk layout ({expected})")]
    RiffSize { declared: u32, expected: u64 },
    #[error("format sub-chunk id is not 'fmt '")]
    FormatId,
    #[error("format sub-chunk size {0} is not one of 16, 18 or 40")]
    FormatSize(u32),
    #[error("extensible format tag requires a 40-byte format sub-chunk, found {0}")]
    ExtensibleMarker(u32),
    #[error("audio format 0x0000 is not decodable")]
    UnknownFormat,
    #[error("bits per sample {0} is not a multiple of 8")]
    BitsPerSample(u16),
    #[error("format sub-chunk extension size must be {expected}, found {found}")]
    ExtensionSize { expected: u16, found: u16 },
    #[error("valid bits per sample {valid} exceed bits per sample {bits}")]
    ValidBitsPerSample { valid: u16, bits: u16 },
    #[error("sub-format leading bytes 0x{leading:04x} do not match audio format 0x{format_tag:04x}")]
    SubFormat { format_tag: u16, leading: u16 },
    #[error("fact sub-chunk id is not 'fact'")]
    FactId,
    #[error("fact sub-chunk size must be 4, found {0}")]
    FactSize(u32),
    #[error("data sub-chunk id is not 'data'")]
    DataId,
    #[error("parse error: {0:?}")]
    Nom(nom::error::ErrorKind),
}

#[derive(Debug)]
pub struct Error<'a> {
    input: &'a [u8],
    pub kind: DecodeError,
}

impl<'a> nom::error::ParseError<&'a [u8]> for Error<'a> {
    fn from_error_kind(input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
        Error {
            input,
            kind: DecodeError::Nom(kind),
        }
    }

    fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

fn fail<T>(input: &[u8], kind: DecodeError) -> IResult<&[u8], T, Error<'_>> {
    Err(Err::Error(Error { input, kind }))
}

/// Runs a primitive parser for one field; coming up short is reported as a
/// short read naming that field.
fn field<'a, O, P>(f: Field, mut parser: P) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], O, Error<'a>>
where
    P: Parser<&'a [u8], O, Error<'a>>,
{
    move |input| {
        parser.parse(input).map_err(|_| {
            Err::Error(Error {
                input,
                kind: DecodeError::ShortRead(f),
            })
        })
    }
}

fn magic<'a>(
    input: &'a [u8],
    f: Field,
    expected: &[u8; 4],
    mismatch: DecodeError,
) -> IResult<&'a [u8], (), Error<'a>> {
    let (i, id) = field(f, take(4usize))(input)?;
    if id != expected {
        return fail(input, mismatch);
    }
    Ok((i, ()))
}

/// RIFF prelude: `RIFF`, outer size, `WAVE`. Returns the declared size.
pub(crate) fn header(input: &[u8]) -> IResult<&[u8], u32, Error<'_>> {
    let (i, _) = magic(input, Field::RiffId, b"RIFF", DecodeError::RiffId)?;
    let (i, riff_size) = field(Field::RiffSize, le_u32)(i)?;
    let (i, _) = magic(i, Field::RiffFormat, b"WAVE", DecodeError::RiffFormat)?;
    Ok((i, riff_size))
}

pub(crate) fn format_chunk(input: &[u8]) -> IResult<&[u8], Format, Error<'_>> {
    let (i, _) = magic(input, Field::FormatId, b"fmt ", DecodeError::FormatId)?;
    let (i, chunk_size) = field(Field::FormatSize, le_u32)(i)?;
    let (i, format_tag) = field(Field::AudioFormat, le_u16)(i)?;
    let (i, channels) = field(Field::Channels, le_u16)(i)?;
    let (i, samples_per_sec) = field(Field::SampleRate, le_u32)(i)?;
    let (i, avg_bytes_per_sec) = field(Field::ByteRate, le_u32)(i)?;
    let (i, block_align) = field(Field::BlockAlign, le_u16)(i)?;
    let (i, bits_per_sample) = field(Field::BitsPerSample, le_u16)(i)?;

    if bits_per_sample % 8 != 0 {
        return fail(input, DecodeError::BitsPerSample(bits_per_sample));
    }
    let kind = match FormatKind::classify(chunk_size, format_tag) {
        Ok(kind) => kind,
        Err(kind) => return fail(input, kind),
    };

    let (i, extension) = match kind {
        FormatKind::Pcm => (i, FormatExtension::None),
        FormatKind::NonPcm => {
            let (i, extension_size) = field(Field::ExtensionSize, le_u16)(i)?;
            if extension_size != 0 {
                return fail(
                    input,
                    DecodeError::ExtensionSize {
                        expected: 0,
                        found: extension_size,
                    },
                );
            }
            (i, FormatExtension::Empty)
        }
        FormatKind::Extensible => {
            let (i, extension_size) = field(Field::ExtensionSize, le_u16)(i)?;
            if extension_size != EXTENSION_SIZE_EXTENSIBLE {
                return fail(
                    input,
                    DecodeError::ExtensionSize {
                        expected: EXTENSION_SIZE_EXTENSIBLE,
                        found: extension_size,
                    },
                );
            }
            let (i, valid_bits_per_sample) = field(Field::ValidBitsPerSample, le_u16)(i)?;
            if valid_bits_per_sample > bits_per_sample {
                return fail(
                    input,
                    DecodeError::ValidBitsPerSample {
                        valid: valid_bits_per_sample,
                        bits: bits_per_sample,
                    },
                );
            }
            let (i, channel_mask) = field(Field::ChannelMask, le_u32)(i)?;
            let (i, guid) = field(Field::SubFormat, take(16usize))(i)?;
            let mut sub_format = [0u8; 16];
            sub_format.copy_from_slice(guid);
            let leading = u16::from_le_bytes([sub_format[0], sub_format[1]]);
            if leading != format_tag {
                return fail(input, DecodeError::SubFormat { format_tag, leading });
            }
            (
                i,
                FormatExtension::Extensible(ExtensibleFormat {
                    valid_bits_per_sample,
                    channel_mask,
                    sub_format,
                }),
            )
        }
    };

    Ok((
        i,
        Format {
            format_tag,
            channels,
            samples_per_sec,
            avg_bytes_per_sec,
            block_align,
            bits_per_sample,
            extension,
        },
    ))
}

pub(crate) fn fact_chunk(input: &[u8]) -> IResult<&[u8], FactChunk, Error<'_>> {
    let (i, _) = magic(input, Field::FactId, b"fact", DecodeError::FactId)?;
    let (i, chunk_size) = field(Field::FactSize, le_u32)(i)?;
    if chunk_size != FACT_CHUNK_SIZE {
        return fail(input, DecodeError::FactSize(chunk_size));
    }
    let (i, sample_length) = field(Field::SampleLength, le_u32)(i)?;
    Ok((i, FactChunk { sample_length }))
}

pub(crate) fn data_header(input: &[u8]) -> IResult<&[u8], u32, Error<'_>> {
    let (i, _) = magic(input, Field::DataId, b"data", DecodeError::DataId)?;
    field(Field::DataSize, le_u32)(i)
}

/// Parses and cross-checks everything up to the payload bytes.
///
/// A fact chunk is required between the format and data chunks for the 18-
/// and 40-byte format layouts and must not appear for the 16-byte layout.
/// The declared RIFF size must equal the size implied by the actual layout.
pub(crate) fn container_header(input: &[u8]) -> IResult<&[u8], WaveHeader, Error<'_>> {
    let (i, riff_size) = header(input)?;
    let (i, format) = format_chunk(i)?;
    let (i, fact) = match format.extension.kind() {
        FormatKind::Pcm => (i, None),
        _ => {
            let (i, fact) = fact_chunk(i)?;
            (i, Some(fact))
        }
    };
    let (i, data_size) = data_header(i)?;

    let header = WaveHeader {
        riff_size,
        format,
        fact,
        data_size,
    };
    let expected = header.expected_riff_size();
    if u64::from(header.riff_size) != expected {
        return fail(
            input,
            DecodeError::RiffSize {
                declared: header.riff_size,
                expected,
            },
        );
    }
    Ok((i, header))
}

/// Parses a complete container, materializing the payload.
///
/// When the data size is odd, the RIFF pad byte that follows the payload is
/// consumed and discarded; the payload itself is never truncated.
pub fn parse_container(input: &[u8]) -> IResult<&[u8], WaveFile, Error<'_>> {
    let (i, header) = container_header(input)?;
    let (i, data) = field(Field::AudioData, take(header.data_size as usize))(i)?;
    let i = if header.data_size % 2 == 1 {
        field(Field::PadByte, take(1usize))(i)?.0
    } else {
        i
    };
    Ok((
        i,
        WaveFile {
            header,
            data: data.to_vec(),
        },
    ))
}
