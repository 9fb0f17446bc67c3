//! Playlists and their on-disk store
//!
//! Each playlist is one JSON document in the playlist directory. The store
//! keeps no cache: every operation re-reads the file, so concurrent writers
//! follow last-write-wins.

use std::cmp::Ordering;
use std::fs;
use std::path::{ Path, PathBuf };
use std::str::FromStr;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::track::{ unix_now, TrackReference };


/// Name of the auto-maintained "recently played" playlist.
pub const RECENT_PLAYLIST_NAME: &str = "Recently Played";

/// Maximum number of entries kept in the recent playlist.
pub const RECENT_PLAYLIST_MAX_SIZE: usize = 30;

const RECENT_PLAYLIST_DESCRIPTION: &str = "Automatically records recently played tracks";


/// Errors that can occur with playlist operations.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Invalid playlist format: {0}" )]
    InvalidFormat( #[from] serde_json::Error ),

    #[error( "Could not determine playlist directory" )]
    NoPlaylistDir,
}


/// Sort key for playlist items.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SortKey {
    /// File name, case-insensitive
    Name,
    /// Server modification time
    Time,
    Size,
    /// Time the item was added to the playlist
    AddTime,
}


impl FromStr for SortKey {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" => Ok( SortKey::Name ),
            "time" => Ok( SortKey::Time ),
            "size" => Ok( SortKey::Size ),
            "add_time" | "added" => Ok( SortKey::AddTime ),
            _ => Err( format!( "Invalid sort key: '{}'. Use 'name', 'time', 'size', or 'add_time'", s ) ),
        }
    }
}


/// A named, ordered list of track references.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
pub struct Playlist {
    pub name: String,
    #[serde( default )]
    pub description: String,
    #[serde( default )]
    pub items: Vec<TrackReference>,
    #[serde( default = "unix_now" )]
    pub create_time: i64,
    #[serde( default = "unix_now" )]
    pub update_time: i64,
}


impl Playlist {
    /// Creates a new empty playlist.
    pub fn new( name: impl Into<String>, description: impl Into<String> ) -> Self {
        let now = unix_now();
        Self {
            name: name.into(),
            description: description.into(),
            items: Vec::new(),
            create_time: now,
            update_time: now,
        }
    }


    /// Appends a track unless one with the same id is already present.
    ///
    /// @returns true if the track was added
    pub fn add_item( &mut self, track: TrackReference ) -> bool {
        if self.items.contains( &track ) {
            tracing::debug!( "{} already in playlist {}", track.server_filename, self.name );
            return false;
        }

        self.items.push( track );
        self.touch();
        true
    }


    /// Removes the track with the given id.
    ///
    /// @returns true if a track was removed
    pub fn remove_item( &mut self, fs_id: u64 ) -> bool {
        let original_len = self.items.len();
        self.items.retain( |t| t.fs_id != fs_id );

        if self.items.len() < original_len {
            self.touch();
            true
        } else {
            false
        }
    }


    /// Removes every track.
    pub fn clear( &mut self ) {
        self.items.clear();
        self.touch();
    }


    /// Stable sort by the given key.
    pub fn sort_by( &mut self, key: SortKey, descending: bool ) {
        let compare = |a: &TrackReference, b: &TrackReference| -> Ordering {
            match key {
                SortKey::Name => a.server_filename.to_lowercase().cmp( &b.server_filename.to_lowercase() ),
                SortKey::Time => a.server_mtime.cmp( &b.server_mtime ),
                SortKey::Size => a.size.cmp( &b.size ),
                SortKey::AddTime => a.add_time.cmp( &b.add_time ),
            }
        };

        if descending {
            self.items.sort_by( |a, b| compare( a, b ).reverse() );
        } else {
            self.items.sort_by( compare );
        }
        self.touch();
    }


    /// Replaces the track at `index`, e.g. with a refreshed reference.
    ///
    /// @returns false if the index is out of range
    pub fn replace( &mut self, index: usize, track: TrackReference ) -> bool {
        match self.items.get_mut( index ) {
            Some( slot ) => {
                *slot = track;
                self.touch();
                true
            }
            None => false,
        }
    }


    /// Index of the track with the given id.
    pub fn position( &self, fs_id: u64 ) -> Option<usize> {
        self.items.iter().position( |t| t.fs_id == fs_id )
    }


    /// Gets the track at `index`.
    pub fn get( &self, index: usize ) -> Option<&TrackReference> {
        self.items.get( index )
    }


    pub fn len( &self ) -> usize {
        self.items.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.items.is_empty()
    }


    /// Bumps the update timestamp. Never moves it backwards.
    pub fn touch( &mut self ) {
        self.update_time = self.update_time.max( unix_now() );
    }
}


/// Replaces path separators so a playlist name is usable as a file name.
pub fn sanitize_name( name: &str ) -> String {
    name.replace( [ '/', '\\' ], "_" )
}


/// File-backed playlist store.
#[derive( Debug, Clone )]
pub struct PlaylistStore {
    dir: PathBuf,
}


impl PlaylistStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open( dir: impl Into<PathBuf> ) -> Result<Self, PlaylistError> {
        let store = Self { dir: dir.into() };
        fs::create_dir_all( &store.dir )?;
        store.ensure_recent()?;
        Ok( store )
    }


    /// Opens the store in the default playlist directory.
    pub fn open_default() -> Result<Self, PlaylistError> {
        let dir = Self::playlist_dir().ok_or( PlaylistError::NoPlaylistDir )?;
        Self::open( dir )
    }


    /// Gets the default playlist directory (~/.local/share/panmusic/playlists on Linux).
    pub fn playlist_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "panmusic" ).join( "playlists" ) )
    }


    /// Directory this store reads and writes.
    pub fn dir( &self ) -> &Path {
        &self.dir
    }


    fn path_for( &self, name: &str ) -> PathBuf {
        self.dir.join( format!( "{}.json", sanitize_name( name ) ) )
    }


    fn read( &self, name: &str ) -> Result<Option<Playlist>, PlaylistError> {
        Self::read_file( &self.path_for( name ) )
    }


    fn read_file( path: &Path ) -> Result<Option<Playlist>, PlaylistError> {
        if !path.exists() {
            return Ok( None );
        }

        let contents = fs::read_to_string( path )?;
        if contents.trim().is_empty() {
            return Ok( None );
        }

        Ok( Some( serde_json::from_str( &contents )? ) )
    }


    fn write( &self, playlist: &Playlist ) -> Result<(), PlaylistError> {
        let json = serde_json::to_string_pretty( playlist )?;
        fs::create_dir_all( &self.dir )?;
        fs::write( self.path_for( &playlist.name ), json )?;
        Ok(())
    }


    fn ensure_recent( &self ) -> Result<Playlist, PlaylistError> {
        if let Some( recent ) = self.read( RECENT_PLAYLIST_NAME )? {
            return Ok( recent );
        }

        tracing::info!( "Creating playlist {}", RECENT_PLAYLIST_NAME );
        let recent = Playlist::new( RECENT_PLAYLIST_NAME, RECENT_PLAYLIST_DESCRIPTION );
        self.write( &recent )?;
        Ok( recent )
    }


    /// Loads a playlist by name.
    ///
    /// Unreadable or corrupt files are logged and reported as absent. The
    /// recent playlist is created on first access.
    pub fn get( &self, name: &str ) -> Option<Playlist> {
        let result = if name == RECENT_PLAYLIST_NAME {
            self.ensure_recent().map( Some )
        } else {
            self.read( name )
        };

        match result {
            Ok( playlist ) => playlist,
            Err( e ) => {
                tracing::error!( "Failed to read playlist {}: {}", name, e );
                None
            }
        }
    }


    /// Loads every playlist in the directory, sorted by name.
    pub fn list_all( &self ) -> Vec<Playlist> {
        let entries = match fs::read_dir( &self.dir ) {
            Ok( entries ) => entries,
            Err( e ) => {
                tracing::error!( "Failed to list playlists in {:?}: {}", self.dir, e );
                return Vec::new();
            }
        };

        let mut playlists: Vec<Playlist> = entries
            .flatten()
            .map( |entry| entry.path() )
            .filter( |path| path.extension().and_then( |e| e.to_str() ) == Some( "json" ) )
            .filter_map( |path| match Self::read_file( &path ) {
                Ok( playlist ) => playlist,
                Err( e ) => {
                    tracing::error!( "Failed to read playlist file {:?}: {}", path, e );
                    None
                }
            })
            .collect();

        playlists.sort_by( |a, b| a.name.cmp( &b.name ) );
        playlists
    }


    /// Creates and persists a new empty playlist.
    ///
    /// @returns None if the name is taken or the write fails
    pub fn create( &self, name: &str, description: &str ) -> Option<Playlist> {
        if self.path_for( name ).exists() {
            tracing::warn!( "Playlist {} already exists", name );
            return None;
        }

        let mut playlist = Playlist::new( name, description );
        self.save( &mut playlist ).ok()?;
        Some( playlist )
    }


    /// Deletes a playlist. The recent playlist cannot be deleted.
    pub fn delete( &self, name: &str ) -> bool {
        if name == RECENT_PLAYLIST_NAME {
            tracing::warn!( "Refusing to delete {}", RECENT_PLAYLIST_NAME );
            return false;
        }

        let path = self.path_for( name );
        if !path.exists() {
            return false;
        }

        match fs::remove_file( &path ) {
            Ok(()) => true,
            Err( e ) => {
                tracing::error!( "Failed to delete playlist {}: {}", name, e );
                false
            }
        }
    }


    /// Persists a playlist, refreshing its update timestamp first.
    pub fn save( &self, playlist: &mut Playlist ) -> Result<(), PlaylistError> {
        playlist.touch();
        self.write( playlist ).inspect_err( |e| {
            tracing::error!( "Failed to save playlist {}: {}", playlist.name, e );
        })
    }


    /// Load, mutate and save a playlist in one step.
    ///
    /// The mutation returns whether anything changed; unchanged playlists
    /// are not written.
    fn modify( &self, name: &str, mutate: impl FnOnce( &mut Playlist ) -> bool ) -> bool {
        let Some( mut playlist ) = self.get( name ) else {
            tracing::warn!( "Playlist {} does not exist", name );
            return false;
        };

        mutate( &mut playlist ) && self.save( &mut playlist ).is_ok()
    }


    /// Adds a track to a stored playlist.
    pub fn add_item( &self, name: &str, track: TrackReference ) -> bool {
        self.modify( name, |p| p.add_item( track ) )
    }


    /// Removes a track from a stored playlist.
    pub fn remove_item( &self, name: &str, fs_id: u64 ) -> bool {
        self.modify( name, |p| p.remove_item( fs_id ) )
    }


    /// Empties a stored playlist.
    pub fn clear( &self, name: &str ) -> bool {
        self.modify( name, |p| {
            p.clear();
            true
        })
    }


    /// Sorts a stored playlist.
    pub fn sort( &self, name: &str, key: SortKey, descending: bool ) -> bool {
        self.modify( name, |p| {
            p.sort_by( key, descending );
            true
        })
    }


    /// Gets the recent playlist, creating it if absent.
    pub fn recent( &self ) -> Playlist {
        self.get( RECENT_PLAYLIST_NAME )
            .unwrap_or_else( || Playlist::new( RECENT_PLAYLIST_NAME, RECENT_PLAYLIST_DESCRIPTION ) )
    }


    /// Moves (or inserts) a track to the front of the recent playlist.
    pub fn record_recently_played( &self, track: &TrackReference ) -> bool {
        let mut recent = self.recent();

        recent.items.retain( |t| t.fs_id != track.fs_id );
        recent.items.insert( 0, track.stamped() );
        recent.items.truncate( RECENT_PLAYLIST_MAX_SIZE );

        self.save( &mut recent ).is_ok()
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn track( id: u64, name: &str, size: u64, mtime: i64 ) -> TrackReference {
        let mut t = TrackReference::new( id, name, format!( "/music/{}", name ), size );
        t.server_mtime = mtime;
        t
    }


    fn store() -> ( tempfile::TempDir, PlaylistStore ) {
        let dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::open( dir.path().join( "playlists" ) ).unwrap();
        ( dir, store )
    }


    #[test]
    fn test_add_item_rejects_duplicate_id() {
        let mut p = Playlist::new( "demo", "" );
        assert!( p.add_item( track( 1, "a.mp3", 1, 0 ) ) );
        assert!( !p.add_item( track( 1, "a-copy.mp3", 2, 0 ) ) );
        assert_eq!( p.len(), 1 );
        assert_eq!( p.items[ 0 ].server_filename, "a.mp3" );
    }


    #[test]
    fn test_remove_item() {
        let mut p = Playlist::new( "demo", "" );
        p.add_item( track( 1, "a.mp3", 1, 0 ) );
        p.add_item( track( 2, "b.mp3", 1, 0 ) );
        assert!( p.remove_item( 1 ) );
        assert!( !p.remove_item( 1 ) );
        assert_eq!( p.position( 2 ), Some( 0 ) );
    }


    #[test]
    fn test_sort_is_stable() {
        let mut p = Playlist::new( "demo", "" );
        p.add_item( track( 1, "b.mp3", 10, 0 ) );
        p.add_item( track( 2, "a.mp3", 20, 0 ) );
        p.add_item( track( 3, "C.mp3", 10, 0 ) );

        p.sort_by( SortKey::Size, false );
        let ids: Vec<u64> = p.items.iter().map( |t| t.fs_id ).collect();
        assert_eq!( ids, vec![ 1, 3, 2 ] );

        p.sort_by( SortKey::Size, true );
        let ids: Vec<u64> = p.items.iter().map( |t| t.fs_id ).collect();
        assert_eq!( ids, vec![ 2, 1, 3 ] );

        p.sort_by( SortKey::Name, false );
        let names: Vec<&str> = p.items.iter().map( |t| t.server_filename.as_str() ).collect();
        assert_eq!( names, vec![ "a.mp3", "b.mp3", "C.mp3" ] );
    }


    #[test]
    fn test_touch_is_monotonic() {
        let mut p = Playlist::new( "demo", "" );
        p.update_time = i64::MAX - 1;
        p.touch();
        assert_eq!( p.update_time, i64::MAX - 1 );
    }


    #[test]
    fn test_serialization_round_trip() {
        let mut p = Playlist::new( "demo", "two songs" );
        p.add_item( track( 1, "a.mp3", 100, 5 ) );
        p.add_item( track( 2, "b.flac", 200, 6 ) );
        p.items[ 1 ].md5 = "d41d8cd98f00b204e9800998ecf8427e".into();
        p.create_time = 1_000;
        p.update_time = 2_000;

        let json = serde_json::to_string( &p ).unwrap();
        let back: Playlist = serde_json::from_str( &json ).unwrap();

        assert_eq!(
            serde_json::to_value( &back ).unwrap(),
            serde_json::to_value( &p ).unwrap(),
        );
        assert_eq!( back.create_time, 1_000 );
        assert_eq!( back.update_time, 2_000 );
    }


    #[test]
    fn test_document_field_names() {
        let mut p = Playlist::new( "demo", "" );
        p.add_item( track( 1, "a.mp3", 100, 5 ) );
        let value = serde_json::to_value( &p ).unwrap();

        for key in [ "name", "description", "items", "create_time", "update_time" ] {
            assert!( value.get( key ).is_some(), "missing {}", key );
        }
        let item = &value[ "items" ][ 0 ];
        for key in [
            "fs_id", "server_filename", "path", "size", "category", "isdir",
            "local_mtime", "server_mtime", "md5", "add_time",
        ] {
            assert!( item.get( key ).is_some(), "missing item field {}", key );
        }
    }


    #[test]
    fn test_sanitize_name() {
        assert_eq!( sanitize_name( "rock/pop\\jazz" ), "rock_pop_jazz" );
    }


    #[test]
    fn test_store_create_get_delete() {
        let ( _dir, store ) = store();

        let created = store.create( "demo", "desc" ).unwrap();
        assert_eq!( created.description, "desc" );
        assert!( store.create( "demo", "again" ).is_none() );

        let loaded = store.get( "demo" ).unwrap();
        assert_eq!( loaded.name, "demo" );

        assert!( store.delete( "demo" ) );
        assert!( !store.delete( "demo" ) );
        assert!( store.get( "demo" ).is_none() );
    }


    #[test]
    fn test_store_names_with_separators() {
        let ( _dir, store ) = store();
        assert!( store.create( "a/b", "" ).is_some() );
        assert!( store.dir().join( "a_b.json" ).exists() );
        assert_eq!( store.get( "a/b" ).unwrap().name, "a/b" );
    }


    #[test]
    fn test_recent_playlist_cannot_be_deleted() {
        let ( _dir, store ) = store();
        assert!( !store.delete( RECENT_PLAYLIST_NAME ) );
        assert!( store.get( RECENT_PLAYLIST_NAME ).is_some() );
    }


    #[test]
    fn test_recent_playlist_created_lazily() {
        let ( _dir, store ) = store();
        fs::remove_file( store.dir().join( format!( "{}.json", RECENT_PLAYLIST_NAME ) ) ).unwrap();
        let recent = store.get( RECENT_PLAYLIST_NAME ).unwrap();
        assert!( recent.is_empty() );
    }


    #[test]
    fn test_store_add_and_remove_item() {
        let ( _dir, store ) = store();
        store.create( "demo", "" ).unwrap();

        assert!( store.add_item( "demo", track( 1, "a.mp3", 1, 0 ) ) );
        assert!( !store.add_item( "demo", track( 1, "a.mp3", 1, 0 ) ) );
        assert!( !store.add_item( "missing", track( 1, "a.mp3", 1, 0 ) ) );
        assert_eq!( store.get( "demo" ).unwrap().len(), 1 );

        assert!( store.remove_item( "demo", 1 ) );
        assert!( store.get( "demo" ).unwrap().is_empty() );
    }


    #[test]
    fn test_store_sort_persists() {
        let ( _dir, store ) = store();
        store.create( "demo", "" ).unwrap();
        store.add_item( "demo", track( 1, "a.mp3", 1, 30 ) );
        store.add_item( "demo", track( 2, "b.mp3", 1, 10 ) );

        assert!( store.sort( "demo", SortKey::Time, false ) );
        let ids: Vec<u64> = store.get( "demo" ).unwrap().items.iter().map( |t| t.fs_id ).collect();
        assert_eq!( ids, vec![ 2, 1 ] );
    }


    #[test]
    fn test_list_all_skips_corrupt_files() {
        let ( _dir, store ) = store();
        store.create( "b", "" ).unwrap();
        store.create( "a", "" ).unwrap();
        fs::write( store.dir().join( "broken.json" ), "{ not json" ).unwrap();

        let names: Vec<String> = store.list_all().into_iter().map( |p| p.name ).collect();
        assert_eq!( names, vec![ "Recently Played", "a", "b" ] );
    }


    #[test]
    fn test_save_refreshes_update_time() {
        let ( _dir, store ) = store();
        let mut p = Playlist::new( "demo", "" );
        p.update_time = 0;
        store.save( &mut p ).unwrap();
        assert!( p.update_time > 0 );
    }


    #[test]
    fn test_recent_is_bounded_and_most_recent_first() {
        let ( _dir, store ) = store();

        for id in 0..40 {
            assert!( store.record_recently_played( &track( id, "t.mp3", 1, 0 ) ) );
        }

        let recent = store.recent();
        assert_eq!( recent.len(), RECENT_PLAYLIST_MAX_SIZE );
        let ids: Vec<u64> = recent.items.iter().map( |t| t.fs_id ).collect();
        let expected: Vec<u64> = ( 10..40 ).rev().collect();
        assert_eq!( ids, expected );
    }


    #[test]
    fn test_recent_deduplicates_by_moving_to_front() {
        let ( _dir, store ) = store();
        store.record_recently_played( &track( 1, "a.mp3", 1, 0 ) );
        store.record_recently_played( &track( 2, "b.mp3", 1, 0 ) );
        store.record_recently_played( &track( 1, "a.mp3", 1, 0 ) );

        let ids: Vec<u64> = store.recent().items.iter().map( |t| t.fs_id ).collect();
        assert_eq!( ids, vec![ 1, 2 ] );
    }
}
