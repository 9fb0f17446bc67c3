//! Application settings management
//!
//! Handles persistent settings for the mirror resolver, playback defaults,
//! download behavior and logging.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use panmusic_core::{ FetchPolicy, PlayMode, PlayerOptions };


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Base URL of the HTTP mirror serving the drive's files
    pub mirror_url: Option<String>,

    /// User-Agent sent with every drive request
    pub user_agent: String,

    pub play_mode: PlayMode,

    /// Initial volume (0-100)
    pub volume: u8,

    /// Play the requested track even in random mode
    pub honor_index_in_random: bool,

    pub fetch_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,

    /// Default log filter when RUST_LOG is not set
    pub log_level: String,

    /// Overrides the default playlist directory
    pub playlist_dir: Option<PathBuf>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror_url: None,
            user_agent: "pan.baidu.com".into(),
            play_mode: PlayMode::Sequential,
            volume: 80,
            honor_index_in_random: false,
            fetch_attempts: 3,
            fetch_backoff_ms: 1000,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            log_level: "info".into(),
            playlist_dir: None,
        }
    }
}


impl Settings {
    /// Returns the path to the default settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "panmusic" ).join( "settings.json" ) )
    }


    /// Loads settings from `path` (or the default location), falling back
    /// to defaults if the file is missing or unreadable.
    ///
    /// @returns The settings and, when the file could not be used, a warning
    /// for the caller to log once logging is set up
    pub fn load( path: Option<&Path> ) -> ( Self, Option<String> ) {
        let path = match path.map( Path::to_path_buf ).or_else( Self::settings_path ) {
            Some( p ) => p,
            None => return ( Self::default(), None ),
        };

        if !path.exists() {
            return ( Self::default(), None );
        }

        match fs::read_to_string( &path ) {
            Ok( contents ) => match serde_json::from_str( &contents ) {
                Ok( settings ) => ( settings, None ),
                Err( e ) => ( Self::default(), Some( format!( "Invalid settings in {:?}: {}", path, e ) ) ),
            },
            Err( e ) => ( Self::default(), Some( format!( "Failed to read settings {:?}: {}", path, e ) ) ),
        }
    }


    /// Takes over the volume and play mode a session ended with.
    ///
    /// @returns true if anything changed
    pub fn remember_session( &mut self, volume: u8, play_mode: PlayMode ) -> bool {
        let changed = self.volume != volume || self.play_mode != play_mode;
        self.volume = volume;
        self.play_mode = play_mode;
        changed
    }


    /// Saves settings to `path` (or the default location).
    pub fn save( &self, path: Option<&Path> ) {
        let path = match path.map( Path::to_path_buf ).or_else( Self::settings_path ) {
            Some( p ) => p,
            None => return,
        };

        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( &path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    pub fn fetch_policy( &self ) -> FetchPolicy {
        FetchPolicy {
            attempts: self.fetch_attempts.max( 1 ),
            backoff: Duration::from_millis( self.fetch_backoff_ms ),
            connect_timeout: Duration::from_secs( self.connect_timeout_secs ),
            read_timeout: Duration::from_secs( self.read_timeout_secs ),
        }
    }


    pub fn player_options( &self ) -> PlayerOptions {
        PlayerOptions {
            fetch: self.fetch_policy(),
            honor_index_in_random: self.honor_index_in_random,
            ..PlayerOptions::default()
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!( settings.user_agent, "pan.baidu.com" );
        assert_eq!( settings.volume, 80 );
        assert_eq!( settings.play_mode, PlayMode::Sequential );

        let policy = settings.fetch_policy();
        assert_eq!( policy.attempts, 3 );
        assert_eq!( policy.backoff, Duration::from_secs( 1 ) );
        assert_eq!( policy.connect_timeout, Duration::from_secs( 10 ) );
        assert_eq!( policy.read_timeout, Duration::from_secs( 30 ) );
        assert!( !settings.player_options().honor_index_in_random );
    }


    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "mirror_url": "http://nas.local/drive", "play_mode": "random" }"# ).unwrap();

        let ( settings, warning ) = Settings::load( Some( &path ) );
        assert!( warning.is_none() );
        assert_eq!( settings.mirror_url.as_deref(), Some( "http://nas.local/drive" ) );
        assert_eq!( settings.play_mode, PlayMode::Random );
        assert_eq!( settings.fetch_attempts, 3 );
    }


    #[test]
    fn test_corrupt_or_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        assert_eq!( Settings::load( Some( &path ) ), ( Settings::default(), None ) );

        fs::write( &path, "{ not json" ).unwrap();
        let ( settings, warning ) = Settings::load( Some( &path ) );
        assert_eq!( settings, Settings::default() );
        assert!( warning.unwrap().starts_with( "Invalid settings" ) );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let settings = Settings { volume: 35, play_mode: PlayMode::Loop, ..Settings::default() };
        settings.save( Some( &path ) );
        assert_eq!( Settings::load( Some( &path ) ).0, settings );
    }


    #[test]
    fn test_session_state_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        let mut settings = Settings { mirror_url: Some( "http://nas.local/drive".into() ), ..Settings::default() };

        assert!( !settings.remember_session( 80, PlayMode::Sequential ) );
        assert!( settings.remember_session( 40, PlayMode::Random ) );
        settings.save( Some( &path ) );

        let ( loaded, _ ) = Settings::load( Some( &path ) );
        assert_eq!( loaded.volume, 40 );
        assert_eq!( loaded.play_mode, PlayMode::Random );
        assert_eq!( loaded.mirror_url, settings.mirror_url );
    }
}
