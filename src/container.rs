//! Typed chunk model for the RIFF/WAVE container.
//!
//! One set of records is shared by the decoder and the encoder; endianness is
//! applied only at the serialization boundary in `parser` and `muxer`.

use thiserror::Error;

use crate::parser::DecodeError;
use crate::{find_codec_from_wav_twocc, FORMAT_EXTENSIBLE, FORMAT_PCM, FORMAT_UNKNOWN, PCM_FLOAT_FORMAT_ID};

pub const WAVEFORMAT: u32 = 16;
pub const WAVEFORMATEX: u32 = 18;
pub const WAVEFORMATEXTENSIBLE: u32 = 40;
pub const FACT_CHUNK_SIZE: u32 = 4;
pub const EXTENSION_SIZE_EXTENSIBLE: u16 = 22;

/// The three format-chunk layouts, selected from the declared chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Pcm,
    NonPcm,
    Extensible,
}

impl FormatKind {
    /// Selects the layout governing the rest of the format chunk.
    ///
    /// The chunk size drives the selection; the audio-format tag is checked
    /// separately: tag 0x0000 is never decodable, and the extensible marker
    /// tag is only consistent with the 40-byte layout.
    pub fn classify(chunk_size: u32, format_tag: u16) -> Result<FormatKind, DecodeError> {
        if format_tag == FORMAT_UNKNOWN {
            return Err(DecodeError::UnknownFormat);
        }
        let kind = match chunk_size {
            WAVEFORMAT => FormatKind::Pcm,
            WAVEFORMATEX => FormatKind::NonPcm,
            WAVEFORMATEXTENSIBLE => FormatKind::Extensible,
            other => return Err(DecodeError::FormatSize(other)),
        };
        if format_tag == FORMAT_EXTENSIBLE && kind != FormatKind::Extensible {
            return Err(DecodeError::ExtensibleMarker(chunk_size));
        }
        Ok(kind)
    }
}

/// Extension fields of the 40-byte format chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensibleFormat {
    pub valid_bits_per_sample: u16,
    pub channel_mask: u32,
    pub sub_format: [u8; 16],
}

/// Tail of the format chunk past the six common fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatExtension {
    /// 16-byte chunk, no extension field.
    None,
    /// 18-byte chunk, extension-size field present and zero.
    Empty,
    /// 40-byte chunk.
    Extensible(ExtensibleFormat),
}

impl FormatExtension {
    pub fn kind(&self) -> FormatKind {
        match self {
            FormatExtension::None => FormatKind::Pcm,
            FormatExtension::Empty => FormatKind::NonPcm,
            FormatExtension::Extensible(_) => FormatKind::Extensible,
        }
    }

    pub fn body_size(&self) -> u32 {
        match self {
            FormatExtension::None => WAVEFORMAT,
            FormatExtension::Empty => WAVEFORMATEX,
            FormatExtension::Extensible(_) => WAVEFORMATEXTENSIBLE,
        }
    }

    /// Extension bytes in wire order, for codec parameters.
    pub fn extradata(&self) -> Option<Vec<u8>> {
        match self {
            FormatExtension::Extensible(ext) => {
                let mut buf = Vec::with_capacity(EXTENSION_SIZE_EXTENSIBLE as usize);
                buf.extend_from_slice(&ext.valid_bits_per_sample.to_le_bytes());
                buf.extend_from_slice(&ext.channel_mask.to_le_bytes());
                buf.extend_from_slice(&ext.sub_format);
                Some(buf)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub extension: FormatExtension,
}

impl Format {
    /// Declared body size of the format chunk for this layout.
    pub fn body_size(&self) -> u32 {
        self.extension.body_size()
    }
}

/// Sample-length record, mandatory for the 18- and 40-byte format layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactChunk {
    pub sample_length: u32,
}

/// Everything in the container except the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveHeader {
    pub riff_size: u32,
    pub format: Format,
    pub fact: Option<FactChunk>,
    pub data_size: u32,
}

impl WaveHeader {
    /// RIFF size implied by the chunk layout: the `WAVE` identifier plus every
    /// sub-chunk with its 8-byte header. Pad bytes are not counted.
    pub fn expected_riff_size(&self) -> u64 {
        let mut size = 4 + 8 + u64::from(self.format.body_size()) + 8 + u64::from(self.data_size);
        if self.fact.is_some() {
            size += 8 + u64::from(FACT_CHUNK_SIZE);
        }
        size
    }
}

/// A decoded or built WAVE container: header fields plus the materialized
/// payload. Immutable after construction except for the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveFile {
    pub header: WaveHeader,
    pub(crate) data: Vec<u8>,
}

/// Parameters for building a minimal container around raw sample bytes.
///
/// Fields are wider than their wire counterparts so out-of-range values are
/// reported instead of truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveConfig {
    pub channels: u32,
    pub sample_rate: u64,
    pub bit_depth: u32,
    pub floating_point: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("channel count exceeds the 16-bit field width")]
    TooManyChannels,
    #[error("sample rate exceeds the 32-bit field width")]
    SampleRateTooHigh,
    #[error("bit depth must be a nonzero multiple of 8")]
    InvalidBitDepth,
    #[error("bit depth exceeds the 16-bit field width")]
    BitDepthTooHigh,
    #[error("payload does not fit the 32-bit riff size field")]
    DataTooLarge,
}

impl WaveFile {
    /// Builds a minimal valid container around `data`.
    ///
    /// With `floating_point` unset this is a plain 16-byte PCM format chunk
    /// and no fact chunk; set, it is the IEEE-float tag with an 18-byte format
    /// chunk and a fact chunk counting whole sample frames. Byte rate, block
    /// align and the RIFF size are derived here so the result always
    /// round-trips through encode and decode.
    pub fn build(cfg: &WaveConfig, data: Vec<u8>) -> Result<WaveFile, ConfigError> {
        if cfg.channels > u32::from(u16::MAX) {
            return Err(ConfigError::TooManyChannels);
        }
        if cfg.sample_rate > u64::from(u32::MAX) {
            return Err(ConfigError::SampleRateTooHigh);
        }
        if cfg.bit_depth == 0 || cfg.bit_depth % 8 != 0 {
            return Err(ConfigError::InvalidBitDepth);
        }
        if cfg.bit_depth > u32::from(u16::MAX) {
            return Err(ConfigError::BitDepthTooHigh);
        }

        let bytes_per_sample = cfg.bit_depth / 8;
        let header_bytes = if cfg.floating_point {
            4 + 8 + u64::from(WAVEFORMATEX) + 8 + u64::from(FACT_CHUNK_SIZE) + 8
        } else {
            4 + 8 + u64::from(WAVEFORMAT) + 8
        };
        if data.len() as u64 + header_bytes > u64::from(u32::MAX) {
            return Err(ConfigError::DataTooLarge);
        }

        let format = Format {
            format_tag: if cfg.floating_point {
                PCM_FLOAT_FORMAT_ID
            } else {
                FORMAT_PCM
            },
            channels: cfg.channels as u16,
            samples_per_sec: cfg.sample_rate as u32,
            avg_bytes_per_sec: (u64::from(cfg.channels) * u64::from(bytes_per_sample)
                * cfg.sample_rate) as u32,
            block_align: (cfg.channels * bytes_per_sample) as u16,
            bits_per_sample: cfg.bit_depth as u16,
            extension: if cfg.floating_point {
                FormatExtension::Empty
            } else {
                FormatExtension::None
            },
        };
        let fact = if cfg.floating_point {
            let frame = cfg.channels * bytes_per_sample;
            Some(FactChunk {
                sample_length: if frame == 0 {
                    0
                } else {
                    (data.len() as u64 / u64::from(frame)) as u32
                },
            })
        } else {
            None
        };

        let mut header = WaveHeader {
            riff_size: 0,
            format,
            fact,
            data_size: data.len() as u32,
        };
        header.riff_size = header.expected_riff_size() as u32;
        Ok(WaveFile { header, data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Payload byte count, from the stored data-chunk size field.
    pub fn data_size(&self) -> u32 {
        self.header.data_size
    }

    /// Container size, from the stored RIFF size field.
    pub fn total_size(&self) -> u32 {
        self.header.riff_size
    }

    pub fn codec_name(&self) -> Option<&'static str> {
        find_codec_from_wav_twocc(self.header.format.format_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_chunk_size() {
        assert_eq!(FormatKind::classify(16, FORMAT_PCM).unwrap(), FormatKind::Pcm);
        assert_eq!(FormatKind::classify(18, 0x0006).unwrap(), FormatKind::NonPcm);
        assert_eq!(
            FormatKind::classify(40, FORMAT_EXTENSIBLE).unwrap(),
            FormatKind::Extensible
        );
    }

    #[test]
    fn classify_rejects_other_sizes() {
        assert!(matches!(
            FormatKind::classify(20, FORMAT_PCM),
            Err(DecodeError::FormatSize(20))
        ));
        assert!(matches!(
            FormatKind::classify(0, FORMAT_PCM),
            Err(DecodeError::FormatSize(0))
        ));
    }

    #[test]
    fn classify_rejects_unknown_tag() {
        assert!(matches!(
            FormatKind::classify(16, FORMAT_UNKNOWN),
            Err(DecodeError::UnknownFormat)
        ));
    }

    #[test]
    fn classify_rejects_misplaced_extensible_marker() {
        assert!(matches!(
            FormatKind::classify(16, FORMAT_EXTENSIBLE),
            Err(DecodeError::ExtensibleMarker(16))
        ));
        assert!(matches!(
            FormatKind::classify(18, FORMAT_EXTENSIBLE),
            Err(DecodeError::ExtensibleMarker(18))
        ));
    }

    #[test]
    fn build_pcm() {
        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 44100,
            bit_depth: 16,
            floating_point: false,
        };
        let wave = WaveFile::build(&cfg, vec![0; 10]).unwrap();
        assert_eq!(wave.total_size(), 46);
        assert_eq!(wave.header.format.format_tag, FORMAT_PCM);
        assert_eq!(wave.header.format.avg_bytes_per_sec, 88200);
        assert_eq!(wave.header.format.block_align, 2);
        assert_eq!(wave.header.format.extension, FormatExtension::None);
        assert_eq!(wave.header.fact, None);
        assert_eq!(wave.data_size(), 10);
        assert_eq!(wave.codec_name(), Some("pcm"));
    }

    #[test]
    fn build_float() {
        let cfg = WaveConfig {
            channels: 2,
            sample_rate: 48000,
            bit_depth: 16,
            floating_point: true,
        };
        let wave = WaveFile::build(&cfg, vec![0; 16]).unwrap();
        assert_eq!(wave.header.format.format_tag, PCM_FLOAT_FORMAT_ID);
        assert_eq!(wave.header.format.extension, FormatExtension::Empty);
        // 16 payload bytes over 4-byte frames
        assert_eq!(wave.header.fact, Some(FactChunk { sample_length: 4 }));
        assert_eq!(wave.total_size(), 66);
    }

    #[test]
    fn build_rejects_out_of_range_config() {
        let cfg = WaveConfig {
            channels: 70000,
            sample_rate: 44100,
            bit_depth: 16,
            floating_point: false,
        };
        assert_eq!(
            WaveFile::build(&cfg, Vec::new()),
            Err(ConfigError::TooManyChannels)
        );

        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 5_000_000_000,
            bit_depth: 16,
            floating_point: false,
        };
        assert_eq!(
            WaveFile::build(&cfg, Vec::new()),
            Err(ConfigError::SampleRateTooHigh)
        );

        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 44100,
            bit_depth: 12,
            floating_point: false,
        };
        assert_eq!(
            WaveFile::build(&cfg, Vec::new()),
            Err(ConfigError::InvalidBitDepth)
        );

        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 44100,
            bit_depth: 0,
            floating_point: false,
        };
        assert_eq!(
            WaveFile::build(&cfg, Vec::new()),
            Err(ConfigError::InvalidBitDepth)
        );

        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 44100,
            bit_depth: 65544,
            floating_point: false,
        };
        assert_eq!(
            WaveFile::build(&cfg, Vec::new()),
            Err(ConfigError::BitDepthTooHigh)
        );
    }

    #[test]
    fn riff_size_counts_every_sub_chunk() {
        let format = Format {
            format_tag: FORMAT_PCM,
            channels: 1,
            samples_per_sec: 8000,
            avg_bytes_per_sec: 8000,
            block_align: 1,
            bits_per_sample: 8,
            extension: FormatExtension::None,
        };
        let header = WaveHeader {
            riff_size: 0,
            format: format.clone(),
            fact: None,
            data_size: 10,
        };
        assert_eq!(header.expected_riff_size(), 46);

        let header = WaveHeader {
            riff_size: 0,
            format: Format {
                extension: FormatExtension::Empty,
                ..format.clone()
            },
            fact: Some(FactChunk { sample_length: 10 }),
            data_size: 10,
        };
        assert_eq!(header.expected_riff_size(), 60);

        let header = WaveHeader {
            riff_size: 0,
            format: Format {
                extension: FormatExtension::Extensible(ExtensibleFormat {
                    valid_bits_per_sample: 8,
                    channel_mask: 1,
                    sub_format: [0; 16],
                }),
                ..format
            },
            fact: Some(FactChunk { sample_length: 10 }),
            data_size: 10,
        };
        assert_eq!(header.expected_riff_size(), 82);
    }

    #[test]
    fn extradata_is_the_wire_extension() {
        assert_eq!(FormatExtension::None.extradata(), None);
        assert_eq!(FormatExtension::Empty.extradata(), None);

        let ext = FormatExtension::Extensible(ExtensibleFormat {
            valid_bits_per_sample: 24,
            channel_mask: 0x3,
            sub_format: [0xAB; 16],
        });
        let bytes = ext.extradata().unwrap();
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[..2], &24u16.to_le_bytes());
        assert_eq!(&bytes[2..6], &0x3u32.to_le_bytes());
        assert_eq!(&bytes[6..], &[0xAB; 16]);
    }
}
