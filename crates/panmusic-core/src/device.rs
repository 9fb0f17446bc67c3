//! Native audio backend
//!
//! Plays a local file on the default output device: Symphonia decodes on a
//! dedicated thread, rubato converts the sample rate when the device does
//! not support the file's, and cpal pulls from the shared sample buffer.

use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::backend::{ AudioBackend, BackendError, BackendState };
use crate::decoder::{ AudioMetadata, Decoder };
use crate::output::{ AudioOutput, SampleBuffer };


/// Keeps the cpal stream alive inside a `Send` backend.
///
/// SAFETY: the stream is never touched after construction; it is only
/// dropped, which stops the device callback. cpal's raw pointers are only
/// used by the callback thread it manages internally.
struct OutputHandle( #[allow( dead_code )] AudioOutput );

unsafe impl Send for OutputHandle {}


/// Sample-rate conversion state for one track.
struct Resample {
    resampler: FastFixedOut<f32>,
    /// Planar input waiting for a full chunk
    pending: Vec<Vec<f32>>,
}


impl Resample {
    fn new( from: u32, to: u32, channels: usize ) -> Result<Self, BackendError> {
        tracing::info!( "Resampling: {} Hz → {} Hz", from, to );
        let resampler = FastFixedOut::<f32>::new(
            to as f64 / from as f64,
            2.0,
            PolynomialDegree::Cubic,
            1024,
            channels,
        ).map_err( |e| BackendError::Output( format!( "Failed to create resampler: {}", e ) ) )?;

        Ok( Self { resampler, pending: vec![ Vec::new(); channels ] } )
    }


    /// Queues interleaved input and returns whatever full chunks produce.
    fn process( &mut self, samples: &[f32] ) -> Vec<f32> {
        let channels = self.pending.len();
        for frame in samples.chunks( channels ) {
            for ( ch, sample ) in frame.iter().enumerate() {
                self.pending[ ch ].push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();

            match self.resampler.process( &chunk, None ) {
                Ok( planar ) => out.extend( interleave( &planar ) ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }
        out
    }


    /// Drains the partial chunk left at end of file.
    fn flush( &mut self ) -> Vec<f32> {
        if self.pending[ 0 ].is_empty() {
            return Vec::new();
        }
        match self.resampler.process_partial( Some( &self.pending ), None ) {
            Ok( planar ) => interleave( &planar ),
            Err( e ) => {
                tracing::error!( "Final resample error: {}", e );
                Vec::new()
            }
        }
    }
}


/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map_or( 0, |c| c.len() );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        out.extend( channels.iter().map( |ch| ch[ f ] ) );
    }
    out
}


/// One running decode thread and its output stream.
struct Playback {
    stop_flag: Arc<AtomicBool>,
    buffer: Arc<SampleBuffer>,
    _output: OutputHandle,
    thread: Option<thread::JoinHandle<()>>,
    frames_played: Arc<AtomicU64>,
    sample_rate: u32,
    ended: Arc<AtomicBool>,
}


impl Playback {
    fn start( decoder: Decoder, start_frame: u64, gain: f32, paused: bool ) -> Result<Self, BackendError> {
        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels();

        let ( output, buffer ) = AudioOutput::new( sample_rate, channels as u16 )
            .map_err( |e| BackendError::Output( e.to_string() ) )?;
        buffer.set_gain( gain );
        buffer.set_paused( paused );
        output.play().map_err( |e| BackendError::Output( e.to_string() ) )?;

        let resample = match output.sample_rate() {
            rate if rate != sample_rate => Some( Resample::new( sample_rate, rate, channels )? ),
            _ => None,
        };

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let frames_played = Arc::new( AtomicU64::new( start_frame ) );
        let ended = Arc::new( AtomicBool::new( false ) );

        let thread = {
            let stop_flag = Arc::clone( &stop_flag );
            let buffer = Arc::clone( &buffer );
            let frames_played = Arc::clone( &frames_played );
            let ended = Arc::clone( &ended );
            thread::Builder::new()
                .name( "panmusic-decode".into() )
                .spawn( move || decode_loop( decoder, buffer, stop_flag, resample, frames_played, ended ) )
                .map_err( |e| BackendError::Output( e.to_string() ) )?
        };

        Ok( Self {
            stop_flag,
            buffer,
            _output: OutputHandle( output ),
            thread: Some( thread ),
            frames_played,
            sample_rate,
            ended,
        })
    }


    fn time_ms( &self ) -> u64 {
        self.frames_played.load( Ordering::Relaxed ) * 1000 / self.sample_rate.max( 1 ) as u64
    }
}


impl Drop for Playback {
    fn drop( &mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
    }
}


fn push_all( buffer: &SampleBuffer, samples: &[f32], stop_flag: &AtomicBool ) {
    let mut offset = 0;
    while offset < samples.len() && !stop_flag.load( Ordering::Relaxed ) {
        let pushed = buffer.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
}


fn decode_loop(
    mut decoder: Decoder,
    buffer: Arc<SampleBuffer>,
    stop_flag: Arc<AtomicBool>,
    mut resample: Option<Resample>,
    frames_played: Arc<AtomicU64>,
    ended: Arc<AtomicBool>,
) {
    let channels = decoder.channels().max( 1 );
    // Stay about 50ms ahead of the device
    let target_fill = decoder.sample_rate() as usize * channels / 20;

    while !stop_flag.load( Ordering::Relaxed ) {
        if buffer.is_paused() {
            thread::sleep( Duration::from_millis( 10 ) );
            continue;
        }
        if buffer.len() > target_fill {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        match decoder.decode_next() {
            Ok( Some( samples ) ) => {
                frames_played.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );
                let samples = match resample.as_mut() {
                    Some( r ) => r.process( &samples ),
                    None => samples,
                };
                push_all( &buffer, &samples, &stop_flag );
            }
            Ok( None ) => {
                if let Some( r ) = resample.as_mut() {
                    push_all( &buffer, &r.flush(), &stop_flag );
                }
                while !buffer.is_empty() && !stop_flag.load( Ordering::Relaxed ) {
                    thread::sleep( Duration::from_millis( 10 ) );
                }
                tracing::debug!( "Decode loop: reached end of file" );
                ended.store( true, Ordering::Relaxed );
                break;
            }
            Err( e ) => {
                tracing::error!( "Decode error: {}", e );
                ended.store( true, Ordering::Relaxed );
                break;
            }
        }
    }
}


/// [`AudioBackend`] playing through the default system output device.
pub struct DeviceBackend {
    path: Option<PathBuf>,
    /// Opened decoder waiting for `play`
    loaded: Option<Decoder>,
    playback: Option<Playback>,
    metadata: Option<AudioMetadata>,
    duration_ms: u64,
    volume: u8,
    paused: bool,
}


impl DeviceBackend {
    pub fn new() -> Self {
        Self {
            path: None,
            loaded: None,
            playback: None,
            metadata: None,
            duration_ms: 0,
            volume: 100,
            paused: false,
        }
    }


    fn gain( &self ) -> f32 {
        self.volume as f32 / 100.0
    }
}


impl Default for DeviceBackend {
    fn default() -> Self {
        Self::new()
    }
}


impl AudioBackend for DeviceBackend {
    fn load( &mut self, path: &Path ) -> Result<(), BackendError> {
        self.stop();

        let decoder = Decoder::open( path ).map_err( |e| BackendError::Open( e.to_string() ) )?;
        self.duration_ms = decoder.duration().map_or( 0, |secs| ( secs * 1000.0 ) as u64 );
        self.metadata = Some( decoder.metadata().clone() );
        self.loaded = Some( decoder );
        self.path = Some( path.to_path_buf() );
        Ok(())
    }


    fn play( &mut self ) -> Result<(), BackendError> {
        if let Some( playback ) = &self.playback {
            playback.buffer.set_paused( false );
            self.paused = false;
            return Ok(());
        }

        let decoder = match self.loaded.take() {
            Some( decoder ) => decoder,
            None => {
                let path = self.path.as_deref().ok_or( BackendError::NoMedia )?;
                Decoder::open( path ).map_err( |e| BackendError::Open( e.to_string() ) )?
            }
        };

        self.playback = Some( Playback::start( decoder, 0, self.gain(), false )? );
        self.paused = false;
        Ok(())
    }


    fn pause( &mut self ) {
        if let Some( playback ) = &self.playback {
            playback.buffer.set_paused( true );
            self.paused = true;
        }
    }


    fn resume( &mut self ) {
        if let Some( playback ) = &self.playback {
            playback.buffer.set_paused( false );
            self.paused = false;
        }
    }


    fn stop( &mut self ) {
        if self.playback.take().is_some() {
            tracing::debug!( "Output stopped" );
        }
        self.loaded = None;
        self.path = None;
        self.metadata = None;
        self.duration_ms = 0;
        self.paused = false;
    }


    fn set_volume( &mut self, volume: u8 ) {
        self.volume = volume.min( 100 );
        if let Some( playback ) = &self.playback {
            playback.buffer.set_gain( self.gain() );
        }
    }


    fn volume( &self ) -> u8 {
        self.volume
    }


    fn time_ms( &self ) -> u64 {
        self.playback.as_ref().map_or( 0, |p| p.time_ms() )
    }


    fn length_ms( &self ) -> u64 {
        self.duration_ms
    }


    /// Reopens the file at the new position, keeping the pause state.
    fn set_position( &mut self, position: f32 ) -> Result<(), BackendError> {
        let path = self.path.clone().ok_or( BackendError::NoMedia )?;
        let target_secs = position.clamp( 0.0, 1.0 ) as f64 * self.duration_ms as f64 / 1000.0;

        self.playback = None;
        self.loaded = None;

        let mut decoder = Decoder::open( &path ).map_err( |e| BackendError::Open( e.to_string() ) )?;
        decoder.seek( target_secs ).map_err( |e| BackendError::Seek( e.to_string() ) )?;
        let start_frame = ( target_secs * decoder.sample_rate() as f64 ) as u64;

        tracing::info!( "Seeking to {:.1}s in {:?}", target_secs, path );
        self.playback = Some( Playback::start( decoder, start_frame, self.gain(), self.paused )? );
        Ok(())
    }


    fn state( &self ) -> BackendState {
        match &self.playback {
            None => BackendState::Idle,
            Some( p ) if p.ended.load( Ordering::Relaxed ) => BackendState::Ended,
            Some( _ ) if self.paused => BackendState::Paused,
            Some( _ ) => BackendState::Playing,
        }
    }


    fn metadata( &self ) -> Option<AudioMetadata> {
        self.metadata.clone()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 3.0, 2.0, 4.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_unloaded_backend_is_idle() {
        let mut backend = DeviceBackend::new();
        assert_eq!( backend.state(), BackendState::Idle );
        assert_eq!( backend.time_ms(), 0 );
        assert_eq!( backend.position(), 0.0 );
        assert!( matches!( backend.play(), Err( BackendError::NoMedia ) ) );
        backend.set_volume( 150 );
        assert_eq!( backend.volume(), 100 );
    }


    #[test]
    fn test_load_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "junk.mp3" );
        std::fs::write( &path, b"definitely not audio" ).unwrap();

        let mut backend = DeviceBackend::new();
        assert!( matches!( backend.load( &path ), Err( BackendError::Open( _ ) ) ) );
    }
}
