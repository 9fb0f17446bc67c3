//! Command-line argument parsing for panmusic.

use std::path::PathBuf;

use clap::{ Parser, Subcommand };

use panmusic_core::{ PlayMode, SortKey };


/// panmusic - Play music stored on a cloud drive from the terminal.
#[derive( Parser, Debug )]
#[command( name = "panmusic" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the default location.
    #[arg( long, global = true )]
    pub config: Option<PathBuf>,

    /// Log to stderr instead of the log file.
    #[arg( short, long, global = true )]
    pub verbose: bool,

    #[command( subcommand )]
    pub command: Commands,
}


#[derive( Subcommand, Debug )]
pub enum Commands {
    /// Manage playlists.
    #[command( subcommand )]
    Playlist( PlaylistCommand ),

    /// Play a playlist interactively.
    Play {
        /// Playlist name.
        playlist: String,

        /// Zero-based index of the first track.
        #[arg( short, long, default_value_t = 0 )]
        index: usize,

        /// Play mode (sequential, loop, random); defaults to the configured mode.
        #[arg( short, long )]
        mode: Option<PlayMode>,
    },
}


#[derive( Subcommand, Debug )]
pub enum PlaylistCommand {
    /// List all playlists.
    List {
        #[arg( long )]
        json: bool,
    },

    /// Show the tracks of a playlist.
    Show {
        name: String,

        #[arg( long )]
        json: bool,
    },

    /// Create an empty playlist.
    Create {
        name: String,

        #[arg( short, long, default_value = "" )]
        description: String,
    },

    /// Delete a playlist.
    Delete {
        name: String,

        /// Do not ask for confirmation.
        #[arg( short, long )]
        force: bool,
    },

    /// Add tracks from a JSON file of drive file-info records.
    Add {
        name: String,

        /// JSON object or array in the drive's file-listing format.
        file: PathBuf,
    },

    /// Remove tracks by fs_id.
    Remove {
        name: String,

        #[arg( required = true )]
        fs_ids: Vec<u64>,
    },

    /// Remove every track from a playlist.
    Clear {
        name: String,

        /// Do not ask for confirmation.
        #[arg( short, long )]
        force: bool,
    },

    /// Sort a playlist in place.
    Sort {
        name: String,

        /// Sort key (name, time, size, add_time).
        #[arg( short, long, default_value = "name" )]
        key: SortKey,

        /// Sort in descending order.
        #[arg( long )]
        desc: bool,
    },

    /// Check every track against the mirror.
    Verify {
        name: String,

        /// Refresh and replace tracks that are no longer valid.
        #[arg( long )]
        auto_refresh: bool,
    },

    /// Show recently played tracks.
    Recent {
        #[arg( long )]
        json: bool,
    },
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play() {
        let args = Args::parse_from([ "panmusic", "play", "demo", "--index", "2", "--mode", "loop" ]);
        match args.command {
            Commands::Play { playlist, index, mode } => {
                assert_eq!( playlist, "demo" );
                assert_eq!( index, 2 );
                assert_eq!( mode, Some( PlayMode::Loop ) );
            }
            other => panic!( "unexpected command: {:?}", other ),
        }
    }


    #[test]
    fn test_parse_playlist_sort() {
        let args = Args::parse_from([ "panmusic", "-v", "playlist", "sort", "demo", "--key", "size", "--desc" ]);
        assert!( args.verbose );
        match args.command {
            Commands::Playlist( PlaylistCommand::Sort { name, key, desc } ) => {
                assert_eq!( name, "demo" );
                assert_eq!( key, SortKey::Size );
                assert!( desc );
            }
            other => panic!( "unexpected command: {:?}", other ),
        }
    }


    #[test]
    fn test_parse_verify_and_force() {
        let args = Args::parse_from([ "panmusic", "playlist", "verify", "demo", "--auto-refresh" ]);
        assert!( matches!(
            args.command,
            Commands::Playlist( PlaylistCommand::Verify { ref name, auto_refresh: true } ) if name == "demo"
        ));

        let args = Args::parse_from([ "panmusic", "playlist", "clear", "demo", "-f" ]);
        assert!( matches!( args.command, Commands::Playlist( PlaylistCommand::Clear { force: true, .. } ) ) );

        let args = Args::parse_from([ "panmusic", "playlist", "delete", "demo" ]);
        assert!( matches!( args.command, Commands::Playlist( PlaylistCommand::Delete { force: false, .. } ) ) );
    }


    #[test]
    fn test_remove_requires_ids() {
        assert!( Args::try_parse_from([ "panmusic", "playlist", "remove", "demo" ]).is_err() );
    }
}
