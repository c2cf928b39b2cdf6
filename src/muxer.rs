use std::io::Write;
use std::sync::Arc;

use av_data::{packet::Packet, value::Value};
use av_format::{common::GlobalInfo, error::*, muxer::*};

use crate::container::{FormatExtension, WaveFile, WaveHeader, EXTENSION_SIZE_EXTENSIBLE, FACT_CHUNK_SIZE};
use crate::parser::Field;
use crate::FORMAT_UNKNOWN;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("short write in {0}")]
    ShortWrite(Field),
    #[error("writing {field}: {source}")]
    Io {
        field: Field,
        source: std::io::Error,
    },
}

fn put<W: Write>(out: &mut W, field: Field, bytes: &[u8]) -> std::result::Result<(), EncodeError> {
    out.write_all(bytes).map_err(|source| {
        if source.kind() == std::io::ErrorKind::WriteZero {
            EncodeError::ShortWrite(field)
        } else {
            EncodeError::Io { field, source }
        }
    })
}

/// Writes every chunk header field in container order, trusting the stored
/// values verbatim. An unknown format tag cannot come out of the decoder or
/// the builder, so hitting one here is a fault in the caller's container.
pub(crate) fn put_header<W: Write>(
    header: &WaveHeader,
    out: &mut W,
) -> std::result::Result<(), EncodeError> {
    let format = &header.format;
    assert!(
        format.format_tag != FORMAT_UNKNOWN,
        "unknown audio format tag in an encoded container"
    );

    put(out, Field::RiffId, b"RIFF")?;
    put(out, Field::RiffSize, &header.riff_size.to_le_bytes())?;
    put(out, Field::RiffFormat, b"WAVE")?;

    put(out, Field::FormatId, b"fmt ")?;
    put(out, Field::FormatSize, &format.body_size().to_le_bytes())?;
    put(out, Field::AudioFormat, &format.format_tag.to_le_bytes())?;
    put(out, Field::Channels, &format.channels.to_le_bytes())?;
    put(out, Field::SampleRate, &format.samples_per_sec.to_le_bytes())?;
    put(out, Field::ByteRate, &format.avg_bytes_per_sec.to_le_bytes())?;
    put(out, Field::BlockAlign, &format.block_align.to_le_bytes())?;
    put(out, Field::BitsPerSample, &format.bits_per_sample.to_le_bytes())?;
    match &format.extension {
        FormatExtension::None => {}
        FormatExtension::Empty => {
            put(out, Field::ExtensionSize, &0u16.to_le_bytes())?;
        }
        FormatExtension::Extensible(ext) => {
            put(out, Field::ExtensionSize, &EXTENSION_SIZE_EXTENSIBLE.to_le_bytes())?;
            put(out, Field::ValidBitsPerSample, &ext.valid_bits_per_sample.to_le_bytes())?;
            put(out, Field::ChannelMask, &ext.channel_mask.to_le_bytes())?;
            put(out, Field::SubFormat, &ext.sub_format)?;
        }
    }

    if let Some(fact) = &header.fact {
        put(out, Field::FactId, b"fact")?;
        put(out, Field::FactSize, &FACT_CHUNK_SIZE.to_le_bytes())?;
        put(out, Field::SampleLength, &fact.sample_length.to_le_bytes())?;
    }

    put(out, Field::DataId, b"data")?;
    put(out, Field::DataSize, &header.data_size.to_le_bytes())
}

impl WaveFile {
    /// Serializes the container to `out`, mirroring the decoder's field
    /// order. Stored sizes and fields are written as they are, and a zero pad
    /// byte follows the payload when the data size is odd.
    pub fn encode<W: Write>(&self, out: &mut W) -> std::result::Result<(), EncodeError> {
        put_header(&self.header, out)?;
        put(out, Field::AudioData, self.data())?;
        if self.header.data_size % 2 == 1 {
            put(out, Field::PadByte, &[0])?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WavMuxer {
    header: WaveHeader,
}

impl WavMuxer {
    pub fn new(header: WaveHeader) -> Self {
        Self { header }
    }
}

impl Muxer for WavMuxer {
    fn configure(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_header<W: Write>(&mut self, out: &mut Writer<W>) -> Result<()> {
        let mut buf = Vec::new();
        if put_header(&self.header, &mut buf).is_err() {
            return Err(Error::InvalidData);
        }
        out.write_all(&buf)?;
        Ok(())
    }

    fn write_packet<W: Write>(&mut self, out: &mut Writer<W>, pkt: Arc<Packet>) -> Result<()> {
        out.write_all(&pkt.data)?;
        Ok(())
    }

    fn write_trailer<W: Write>(&mut self, out: &mut Writer<W>) -> Result<()> {
        if self.header.data_size % 2 == 1 {
            out.write_all(&[0])?;
        }
        Ok(())
    }

    fn set_global_info(&mut self, _info: GlobalInfo) -> Result<()> {
        Ok(())
    }

    fn set_option<'a>(&mut self, _key: &str, _val: Value<'a>) -> Result<()> {
        Ok(())
    }
}
