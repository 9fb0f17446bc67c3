//! Track resolution
//!
//! The engine never talks to the drive directly. A resolver checks that a
//! reference still points at a live file and turns it into a download URL.

use thiserror::Error;

use crate::track::TrackReference;


/// Errors that can occur while resolving a download URL.
#[derive( Debug, Error )]
pub enum ResolveError {
    #[error( "Track {0} not found" )]
    NotFound( u64 ),

    #[error( "Resolver request failed: {0}" )]
    Request( String ),
}


/// Remote lookup capability used by the player.
pub trait TrackResolver: Send + Sync {
    /// Returns true if the reference still resolves to a file.
    fn is_valid( &self, track: &TrackReference ) -> bool;

    /// Fetches fresh metadata for the reference, if the file still exists.
    fn refresh( &self, track: &TrackReference ) -> Option<TrackReference>;

    /// Produces a direct-access URL for the track's content.
    fn resolve_download_url( &self, track: &TrackReference ) -> Result<String, ResolveError>;

    /// Extra headers required when downloading from the resolved URL.
    fn request_headers( &self ) -> Vec<( String, String )> {
        Vec::new()
    }
}
