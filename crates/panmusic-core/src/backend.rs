//! Audio backend abstraction
//!
//! The player drives audio through this trait so that decoding and output
//! stay opaque to the playback state machine.

use std::path::Path;

use thiserror::Error;

use crate::decoder::AudioMetadata;


/// Errors reported by an audio backend.
#[derive( Debug, Error )]
pub enum BackendError {
    #[error( "Failed to open media: {0}" )]
    Open( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "Seek failed: {0}" )]
    Seek( String ),

    #[error( "No media loaded" )]
    NoMedia,
}


/// Coarse state reported by a backend.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum BackendState {
    Idle,
    Playing,
    Paused,
    /// The loaded media played to its end.
    Ended,
}


/// Media playback capability for one local file at a time.
pub trait AudioBackend: Send {
    /// Loads a local file, replacing any previous media.
    fn load( &mut self, path: &Path ) -> Result<(), BackendError>;

    /// Starts playback of the loaded media.
    fn play( &mut self ) -> Result<(), BackendError>;

    fn pause( &mut self );

    fn resume( &mut self );

    /// Stops playback and releases the media.
    fn stop( &mut self );

    /// Sets the volume (0-100).
    fn set_volume( &mut self, volume: u8 );

    fn volume( &self ) -> u8;

    /// Elapsed playback time in milliseconds.
    fn time_ms( &self ) -> u64;

    /// Length of the loaded media in milliseconds, 0 if unknown.
    fn length_ms( &self ) -> u64;

    /// Playback position as a fraction of the length (0.0 to 1.0).
    fn position( &self ) -> f32 {
        let length = self.length_ms();
        if length == 0 {
            return 0.0;
        }
        ( self.time_ms() as f64 / length as f64 ).clamp( 0.0, 1.0 ) as f32
    }

    /// Seeks to a fraction of the length (0.0 to 1.0).
    fn set_position( &mut self, position: f32 ) -> Result<(), BackendError>;

    fn state( &self ) -> BackendState;

    /// Tags and format details of the loaded media.
    fn metadata( &self ) -> Option<AudioMetadata> {
        None
    }
}
