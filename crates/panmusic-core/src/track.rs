//! Remote track references
//!
//! A track reference describes one audio file on the cloud drive,
//! independent of whether it has been downloaded.

use std::hash::{ Hash, Hasher };
use std::path::Path;

use serde::{ Deserialize, Serialize };


/// Supported audio file extensions.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "aac", "ogg", "m4a", "wma", "aiff", "alac", "ape", "opus",
];


/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}


/// One remote audio file as reported by the drive.
///
/// Identity is the remote `fs_id`: two references with the same id are
/// equal even when their metadata differs (e.g. before and after a refresh).
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct TrackReference {
    pub fs_id: u64,
    pub server_filename: String,
    pub path: String,
    pub size: u64,
    #[serde( default )]
    pub category: u32,
    #[serde( default )]
    pub isdir: u32,
    #[serde( default )]
    pub local_mtime: i64,
    #[serde( default )]
    pub server_mtime: i64,
    #[serde( default )]
    pub md5: String,
    #[serde( default = "unix_now" )]
    pub add_time: i64,
}


impl TrackReference {
    /// Creates a reference with only the required fields set.
    pub fn new( fs_id: u64, server_filename: impl Into<String>, path: impl Into<String>, size: u64 ) -> Self {
        Self {
            fs_id,
            server_filename: server_filename.into(),
            path: path.into(),
            size,
            category: 0,
            isdir: 0,
            local_mtime: 0,
            server_mtime: 0,
            md5: String::new(),
            add_time: unix_now(),
        }
    }


    /// Returns a copy with `add_time` set to now.
    ///
    /// Used when a listing entry from the drive becomes a playlist item.
    pub fn stamped( &self ) -> Self {
        Self {
            add_time: unix_now(),
            ..self.clone()
        }
    }


    /// Lower-cased file extension without the dot, if any.
    pub fn extension( &self ) -> Option<String> {
        Path::new( &self.server_filename )
            .extension()
            .and_then( |e| e.to_str() )
            .map( |e| e.to_lowercase() )
    }


    /// Returns true if this is a regular file with a supported audio extension.
    pub fn is_audio( &self ) -> bool {
        self.isdir == 0
            && self.extension()
                .map( |e| SUPPORTED_EXTENSIONS.contains( &e.as_str() ) )
                .unwrap_or( false )
    }
}


impl PartialEq for TrackReference {
    fn eq( &self, other: &Self ) -> bool {
        self.fs_id == other.fs_id
    }
}


impl Eq for TrackReference {}


impl Hash for TrackReference {
    fn hash<H: Hasher>( &self, state: &mut H ) {
        self.fs_id.hash( state );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_equality_is_by_fs_id() {
        let a = TrackReference::new( 7, "a.mp3", "/music/a.mp3", 100 );
        let mut b = TrackReference::new( 7, "renamed.mp3", "/other/renamed.mp3", 200 );
        b.md5 = "abc".into();
        assert_eq!( a, b );
        assert_ne!( a, TrackReference::new( 8, "a.mp3", "/music/a.mp3", 100 ) );
    }


    #[test]
    fn test_deserialize_fills_missing_fields() {
        let json = r#"{"fs_id": 42, "server_filename": "Song.FLAC", "path": "/m/Song.FLAC", "size": 9}"#;
        let track: TrackReference = serde_json::from_str( json ).unwrap();
        assert_eq!( track.category, 0 );
        assert_eq!( track.md5, "" );
        assert!( track.add_time > 0 );
        assert_eq!( track.extension().as_deref(), Some( "flac" ) );
        assert!( track.is_audio() );
    }


    #[test]
    fn test_directories_and_documents_are_not_audio() {
        let mut dir = TrackReference::new( 1, "album.mp3", "/album.mp3", 0 );
        dir.isdir = 1;
        assert!( !dir.is_audio() );
        assert!( !TrackReference::new( 2, "notes.txt", "/notes.txt", 1 ).is_audio() );
        assert!( !TrackReference::new( 3, "README", "/README", 1 ).is_audio() );
    }
}
