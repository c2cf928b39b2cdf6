use std::io::{Read, SeekFrom};
use std::sync::Arc;

use nom::{Err, IResult, Needed, Offset};

use av_data::{
    audiosample::{ChannelMap, Soniton},
    packet::Packet,
    params::*,
    rational::Rational64,
    timeinfo::TimeInfo,
};
use av_format::{
    buffer::Buffered,
    common::GlobalInfo,
    demuxer::{Demuxer, Descr, Descriptor, Event},
    error::*,
    stream::Stream,
};

use crate::container::{WaveFile, WaveHeader};
use crate::parser::{self, DecodeError};
use crate::{find_codec_from_wav_twocc, PCM_FLOAT_FORMAT_ID};

impl WaveFile {
    /// Reads one complete container from `reader`.
    ///
    /// The payload is materialized in memory. Any structural mismatch or
    /// truncation aborts with the error naming the failed check; I/O faults
    /// from the reader are wrapped.
    pub fn decode<R: Read>(mut reader: R) -> std::result::Result<WaveFile, DecodeError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        match parser::parse_container(&buf) {
            Ok((_, wave)) => Ok(wave),
            Err(Err::Error(e)) | Err(Err::Failure(e)) => Err(e.kind),
            Err(Err::Incomplete(_)) => Err(DecodeError::Nom(nom::error::ErrorKind::Complete)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WavDemuxer {
    pub header: Option<WaveHeader>,
    cname: &'static str,
    duration: u64,
    payload_sent: bool,
}

impl WavDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_headers<'a>(
        &mut self,
        input: &'a [u8],
    ) -> IResult<&'a [u8], WaveHeader, crate::parser::Error<'a>> {
        let (i, header) = parser::container_header(input)?;

        self.cname = find_codec_from_wav_twocc(header.format.format_tag).unwrap_or("unknown");
        // Duration in ms, from the fact sample count when present
        self.duration = if let Some(fact) = &header.fact {
            if header.format.samples_per_sec > 0 {
                u64::from(fact.sample_length) * 1000 / u64::from(header.format.samples_per_sec)
            } else {
                0
            }
        } else if header.format.avg_bytes_per_sec > 0 {
            u64::from(header.data_size) * 1000 / u64::from(header.format.avg_bytes_per_sec)
        } else {
            0
        };
        self.header = Some(header.clone());
        Ok((i, header))
    }
}

impl Demuxer for WavDemuxer {
    fn read_headers(&mut self, buf: &mut dyn Buffered, info: &mut GlobalInfo) -> Result<SeekFrom> {
        match self.parse_headers(buf.data()) {
            Ok((i, header)) => {
                let soniton = if self.cname == "pcm" {
                    if header.format.format_tag != PCM_FLOAT_FORMAT_ID {
                        if header.format.bits_per_sample == 8 {
                            Soniton::new(8, false, false, false, false, false)
                        } else {
                            Soniton::new(
                                header.format.bits_per_sample as u8,
                                false,
                                false,
                                false,
                                false,
                                true,
                            )
                        }
                    } else {
                        Soniton::new(
                            header.format.bits_per_sample as u8,
                            false,
                            false,
                            false,
                            true,
                            false,
                        )
                    }
                } else {
                    Soniton::new(
                        header.format.bits_per_sample as u8,
                        false,
                        false,
                        false,
                        false,
                        true,
                    )
                };
                let audio_info = AudioInfo {
                    rate: header.format.samples_per_sec as usize,
                    map: Some(ChannelMap::default_map(header.format.channels as usize)),
                    format: Some(Arc::new(soniton)),
                };
                let stream = Stream {
                    id: 0,
                    index: 0,
                    start: None,
                    duration: Some(self.duration),
                    timebase: Rational64::new(1, i64::from(header.format.samples_per_sec).max(1)),
                    params: CodecParams {
                        extradata: header.format.extension.extradata(),
                        bit_rate: 0,
                        delay: 0,
                        convergence_window: 0,
                        codec_id: Some(self.cname.to_owned()),
                        kind: Some(MediaKind::Audio(audio_info)),
                    },
                    user_private: None,
                };
                info.duration = Some(self.duration);
                info.add_stream(stream);
                Ok(SeekFrom::Current(buf.data().offset(i) as i64))
            }
            Err(Err::Incomplete(needed)) => {
                let sz = match needed {
                    Needed::Size(size) => buf.data().len() + usize::from(size),
                    _ => 1024,
                };
                Err(Error::MoreDataNeeded(sz))
            }
            _ => Err(Error::InvalidData),
        }
    }

    fn read_event(&mut self, buf: &mut dyn Buffered) -> Result<(SeekFrom, Event)> {
        let header = match &self.header {
            Some(header) => header,
            None => return Err(Error::InvalidData),
        };
        if self.payload_sent {
            return Ok((SeekFrom::Current(0), Event::Eof));
        }

        // The whole payload is one packet, plus the pad byte when the size is odd
        let data_size = header.data_size as usize;
        let total = data_size + (header.data_size % 2) as usize;
        if buf.data().len() < total {
            return Err(Error::MoreDataNeeded(total));
        }

        let packet = Packet {
            data: buf.data()[..data_size].to_vec(),
            t: TimeInfo {
                pts: Some(0),
                dts: None,
                duration: None,
                timebase: None,
                user_private: None,
            },
            pos: None,
            stream_index: 0,
            is_key: false,
            is_corrupted: false,
        };

        self.payload_sent = true;
        Ok((SeekFrom::Current(total as i64), Event::NewPacket(packet)))
    }
}

struct Des {
    d: Descr,
}

impl Descriptor for Des {
    type OutputDemuxer = WavDemuxer;

    fn create(&self) -> Self::OutputDemuxer {
        WavDemuxer::new()
    }
    fn describe(&self) -> &Descr {
        &self.d
    }
    fn probe(&self, data: &[u8]) -> u8 {
        data.get(..12)
            .map_or(0, |prelude| parser::header(prelude).map_or(0, |_| 12))
    }
}

pub const WAV_DESC: &dyn Descriptor<OutputDemuxer = WavDemuxer> = &Des {
    d: Descr {
        name: "wav",
        demuxer: "wav",
        description: "RIFF/WAVE container demuxer",
        extensions: &["wav"],
        mime: &["audio/x-wav"],
    },
};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use av_format::{buffer::*, demuxer::Context};

    use super::*;
    use crate::container::WaveConfig;
    use crate::parser::Field;

    fn sample_wave() -> WaveFile {
        let cfg = WaveConfig {
            channels: 1,
            sample_rate: 44100,
            bit_depth: 16,
            floating_point: false,
        };
        WaveFile::build(&cfg, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap()
    }

    fn sample_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        sample_wave().encode(&mut out).unwrap();
        out
    }

    #[test]
    fn decode_yields_the_built_container() {
        let decoded = WaveFile::decode(Cursor::new(sample_bytes())).unwrap();
        assert_eq!(decoded, sample_wave());
    }

    #[test]
    fn decode_reports_truncation() {
        let bytes = sample_bytes();
        let err = WaveFile::decode(Cursor::new(&bytes[..26])).unwrap_err();
        assert!(matches!(err, DecodeError::ShortRead(Field::SampleRate)));
    }

    #[test]
    fn context() {
        let mut context = Context::new(WavDemuxer::new(), AccReader::new(Cursor::new(sample_bytes())));

        context.read_headers().unwrap();
        assert_eq!(
            context.demuxer().header.as_ref().unwrap(),
            &sample_wave().header
        );

        let mut payload = Vec::new();
        loop {
            match context.read_event().unwrap() {
                Event::NewPacket(packet) => payload.extend_from_slice(&packet.data),
                Event::Eof => break,
                Event::Continue => continue,
                event => panic!("unexpected event: {:?}", event),
            }
        }
        assert_eq!(payload, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn probe_recognizes_the_prelude() {
        assert_eq!(WAV_DESC.probe(&sample_bytes()), 12);
        assert_eq!(WAV_DESC.probe(b"XIFFxxxxWAVE"), 0);
        assert_eq!(WAV_DESC.probe(b"RIFF"), 0);
    }
}
