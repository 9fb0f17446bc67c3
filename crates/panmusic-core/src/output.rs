//! Audio output via cpal
//!
//! Sends decoded PCM samples to the default system audio device.

use std::collections::VecDeque;
use std::sync::{ Arc, Mutex, PoisonError };
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Sample queue shared by the decode thread (producer) and the device
/// callback (consumer). Converts channel layout on the way out.
pub struct SampleBuffer {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    /// Linear gain stored as f32 bits
    gain: AtomicU32,
    source_channels: usize,
    output_channels: usize,
}


impl SampleBuffer {
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            gain: AtomicU32::new( 1.0_f32.to_bits() ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    fn queue( &self ) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Pushes samples, returning how many fit.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.queue();
        let to_push = samples.len().min( self.capacity.saturating_sub( buf.len() ) );
        buf.extend( samples[ ..to_push ].iter().copied() );
        to_push
    }


    /// Fills `output` with whole frames, padding with silence.
    pub fn pop( &self, output: &mut [f32] ) {
        output.fill( 0.0 );
        if self.paused.load( Ordering::Relaxed ) {
            return;
        }

        let gain = f32::from_bits( self.gain.load( Ordering::Relaxed ) );
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;
        let mut buf = self.queue();

        let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );
        let mut frame = Vec::with_capacity( src_ch );

        for out_frame in output.chunks_mut( out_ch ).take( frames ) {
            frame.clear();
            frame.extend( buf.drain( ..src_ch ) );

            if src_ch == 2 && out_ch == 1 {
                out_frame[ 0 ] = ( frame[ 0 ] + frame[ 1 ] ) * 0.5 * gain;
                continue;
            }

            // Extra output channels repeat the last source channel
            for ( ch, sample ) in out_frame.iter_mut().enumerate() {
                *sample = frame[ ch.min( src_ch - 1 ) ] * gain;
            }
        }
    }


    pub fn len( &self ) -> usize {
        self.queue().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.queue().is_empty()
    }


    pub fn clear( &self ) {
        self.queue().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    /// Sets the linear gain (0.0 = mute, 1.0 = unity).
    pub fn set_gain( &self, gain: f32 ) {
        self.gain.store( gain.to_bits(), Ordering::Relaxed );
    }
}


/// Audio output stream.
/// Note: not Send/Sync because of cpal::Stream.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}


impl AudioOutput {
    /// Opens the default device for the given source format.
    ///
    /// Returns the output and the buffer the decoder should fill.
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
    ) -> Result<( Self, Arc<SampleBuffer> ), OutputError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .collect();

        let rate_fits = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        // Prefer an exact match, then any layout at our rate, then the device default
        let config = match supported.iter()
            .find( |&c| c.channels() == source_channels && rate_fits( c ) )
            .or_else( || supported.iter().find( |&c| rate_fits( c ) ) )
        {
            Some( range ) => range.clone().with_sample_rate( cpal::SampleRate( source_sample_rate ) ).config(),
            None => device
                .default_output_config()
                .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
                .config(),
        };

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        // About half a second of audio
        let capacity = source_sample_rate as usize * source_channels as usize / 2;
        let buffer = Arc::new( SampleBuffer::new( capacity, source_channels, config.channels ) );
        let consumer = Arc::clone( &buffer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| consumer.pop( data ),
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok(( Self { stream, sample_rate: config.sample_rate.0 }, buffer ))
    }


    pub fn play( &self ) -> Result<(), OutputError> {
        self.stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )
    }


    /// Gets the device sample rate.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_push_respects_capacity() {
        let buf = SampleBuffer::new( 4, 2, 2 );
        assert_eq!( buf.push( &[ 0.1; 6 ] ), 4 );
        assert_eq!( buf.len(), 4 );
    }


    #[test]
    fn test_pop_mono_to_stereo_with_gain() {
        let buf = SampleBuffer::new( 16, 1, 2 );
        buf.push( &[ 0.5, 1.0 ] );
        buf.set_gain( 0.5 );

        let mut out = [ 9.0; 6 ];
        buf.pop( &mut out );
        assert_eq!( out, [ 0.25, 0.25, 0.5, 0.5, 0.0, 0.0 ] );
        assert!( buf.is_empty() );
    }


    #[test]
    fn test_pop_stereo_to_mono() {
        let buf = SampleBuffer::new( 16, 2, 1 );
        buf.push( &[ 0.2, 0.4 ] );

        let mut out = [ 0.0; 2 ];
        buf.pop( &mut out );
        assert!( ( out[ 0 ] - 0.3 ).abs() < 1e-6 );
        assert_eq!( out[ 1 ], 0.0 );
    }


    #[test]
    fn test_paused_outputs_silence() {
        let buf = SampleBuffer::new( 16, 2, 2 );
        buf.push( &[ 1.0, 1.0 ] );
        buf.set_paused( true );

        let mut out = [ 5.0; 2 ];
        buf.pop( &mut out );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( buf.len(), 2 );
    }
}
