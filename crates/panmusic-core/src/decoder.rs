//! Audio decoding via Symphonia
//!
//! Decodes a materialized scratch file into interleaved f32 PCM.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;


/// Tags and format details of a decoded file.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}


impl AudioMetadata {
    /// Non-empty fields as label/value pairs, in display order.
    pub fn entries( &self ) -> Vec<( &'static str, String )> {
        let mut entries = Vec::new();
        let mut push = |label: &'static str, value: Option<String>| {
            if let Some( value ) = value {
                entries.push(( label, value ));
            }
        };

        push( "Title", self.title.clone() );
        push( "Artist", self.artist.clone() );
        push( "Album", self.album.clone() );
        push( "Track", self.track_number.map( |n| n.to_string() ) );
        push( "Genre", self.genre.clone() );
        push( "Year", self.year.map( |y| y.to_string() ) );
        push( "Codec", self.codec.clone() );
        push( "Sample rate", self.sample_rate.map( |r| format!( "{} Hz", r ) ) );
        push( "Channels", self.channels.map( |c| c.to_string() ) );
        entries
    }


    fn apply_tags( &mut self, tags: &[Tag] ) {
        for tag in tags {
            let Some( key ) = tag.std_key else { continue };
            let value = tag.value.to_string();

            // First occurrence wins
            match key {
                StandardTagKey::TrackTitle => { self.title.get_or_insert( value ); }
                StandardTagKey::Artist => { self.artist.get_or_insert( value ); }
                StandardTagKey::Album => { self.album.get_or_insert( value ); }
                StandardTagKey::Genre => { self.genre.get_or_insert( value ); }
                StandardTagKey::TrackNumber => {
                    if self.track_number.is_none() {
                        self.track_number = value.split( '/' ).next().and_then( |n| n.trim().parse().ok() );
                    }
                }
                StandardTagKey::Date | StandardTagKey::ReleaseDate => {
                    if self.year.is_none() {
                        self.year = value.split( '-' ).next().and_then( |y| y.trim().parse().ok() );
                    }
                }
                _ => {}
            }
        }
    }
}


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Audio decoder wrapper around Symphonia.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    duration: Option<f64>,
    metadata: AudioMetadata,
}


impl Decoder {
    /// Opens an audio file for decoding.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

        // Scratch files keep the remote extension, which helps the probe
        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let mut probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;

        // Container tags (ID3 etc.) first, then any the format reader adds
        let mut metadata = AudioMetadata::default();
        if let Some( log ) = probed.metadata.get() {
            if let Some( rev ) = log.current() {
                metadata.apply_tags( rev.tags() );
            }
        }
        if let Some( rev ) = probed.format.metadata().current() {
            metadata.apply_tags( rev.tags() );
        }

        let format_reader = probed.format;
        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames.map( |frames| frames as f64 / sample_rate as f64 );

        metadata.sample_rate = Some( sample_rate );
        metadata.channels = Some( channels as u32 );
        metadata.codec = symphonia::default::get_codecs()
            .get_codec( codec_params.codec )
            .map( |d| d.short_name.to_uppercase() );

        tracing::info!(
            "Opened audio: {} Hz, {} channels, duration: {:?}s",
            sample_rate,
            channels,
            duration
        );

        let decoder = symphonia::default::get_codecs()
            .make( &codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            duration,
            metadata,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Returns the duration in seconds, if known.
    pub fn duration( &self ) -> Option<f64> {
        self.duration
    }


    pub fn metadata( &self ) -> &AudioMetadata {
        &self.metadata
    }


    /// Decodes the next packet and returns interleaved f32 samples.
    ///
    /// Returns None when EOF is reached.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( symphonia::core::errors::Error::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt packets are skipped
                Err( symphonia::core::errors::Error::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if self.sample_buf.as_ref().map_or( true, |b| b.capacity() < frames ) {
                self.sample_buf = Some( SampleBuffer::new( frames as u64, spec ) );
            }

            let Some( buf ) = self.sample_buf.as_mut() else { continue };
            buf.copy_interleaved_ref( decoded );

            return Ok( Some( buf.samples().to_vec() ) );
        }
    }


    /// Seeks to a position in seconds.
    pub fn seek( &mut self, position_secs: f64 ) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position_secs ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;

        self.decoder.reset();
        Ok(())
    }
}
