//! Interactive command parsing and execution.
//!
//! Commands come either from single key presses during a play session or
//! from typed input (`vol 40`, `seek 1:30`, `mode loop`), and are executed
//! against a [`Player`].

use std::time::Duration;

use thiserror::Error;

use crate::mode::PlayMode;
use crate::player::Player;


/// Volume change applied by the `+` and `-` keys.
pub const VOLUME_STEP: i32 = 5;


/// Errors that can occur during command parsing or execution.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),

    #[error( "Execution failed: {0}" )]
    ExecutionFailed( String ),
}


/// Parsed interactive command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Playback commands
    /// Plays the track at a zero-based index.
    Play { index: usize },
    Pause,
    Stop,
    Next,
    Prev,
    Seek { position: Duration },

    // Volume commands
    VolumeUp,
    VolumeDown,
    Volume { level: u32 },
    Mute,

    /// Sets the play mode, or cycles it when `None`.
    Mode { mode: Option<PlayMode> },

    Status,
    Help,
    Quit,
}


impl Command {
    /// Maps a single key press to a command.
    pub fn from_key( key: char ) -> Option<Self> {
        match key {
            ' ' => Some( Command::Pause ),
            'n' => Some( Command::Next ),
            'p' => Some( Command::Prev ),
            's' => Some( Command::Stop ),
            '+' | '=' => Some( Command::VolumeUp ),
            '-' | '_' => Some( Command::VolumeDown ),
            'u' => Some( Command::Mute ),
            'm' => Some( Command::Mode { mode: None } ),
            'i' => Some( Command::Status ),
            '?' | 'h' => Some( Command::Help ),
            'q' => Some( Command::Quit ),
            _ => None,
        }
    }


    /// Parses a typed command.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "play" | "pl" => {
                let number = args
                    .ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                let index = number.parse::<usize>()
                    .ok()
                    .and_then( |n| n.checked_sub( 1 ) )
                    .ok_or_else( || CommandError::InvalidArgument( format!( "Invalid track number: {}", number ) ) )?;
                Ok( Command::Play { index } )
            }
            "pause" | "pa" => Ok( Command::Pause ),
            "stop" | "st" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "p" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let time_str = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                let position = parse_time( time_str )?;
                Ok( Command::Seek { position } )
            }

            "vol" | "volume" => {
                let level = args
                    .ok_or_else( || CommandError::MissingArgument( "volume level".into() ) )?;
                let level = level.parse::<u32>()
                    .ok()
                    .filter( |l| *l <= 100 )
                    .ok_or_else( || CommandError::InvalidArgument( format!( "Invalid volume: {}", level ) ) )?;
                Ok( Command::Volume { level } )
            }
            "up" | "+" => Ok( Command::VolumeUp ),
            "down" | "-" => Ok( Command::VolumeDown ),
            "mute" | "unmute" => Ok( Command::Mute ),
            "mode" => {
                let mode = args
                    .map( |s| s.parse::<PlayMode>() )
                    .transpose()
                    .map_err( CommandError::InvalidArgument )?;
                Ok( Command::Mode { mode } )
            }

            "status" | "info" | "i" => Ok( Command::Status ),
            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Play { .. } => "Play track by number",
            Command::Pause => "Pause/resume playback",
            Command::Stop => "Stop playback",
            Command::Next => "Next track",
            Command::Prev => "Previous track",
            Command::Seek { .. } => "Seek to position",
            Command::VolumeUp => "Volume up",
            Command::VolumeDown => "Volume down",
            Command::Volume { .. } => "Set volume (0-100)",
            Command::Mute => "Toggle mute",
            Command::Mode { .. } => "Set or cycle play mode",
            Command::Status => "Show track details",
            Command::Help => "Show help",
            Command::Quit => "Quit",
        }
    }


    /// Runs the command against `player`.
    ///
    /// @returns A one-line message describing the outcome
    pub fn execute( &self, player: &Player ) -> Result<String, CommandError> {
        let failed = |what: &str| Err( CommandError::ExecutionFailed( what.to_string() ) );

        match self {
            Command::Play { index } => {
                if !player.play( *index ) {
                    return failed( "could not start track" );
                }
                Ok( now_playing( player ) )
            }
            Command::Pause => {
                if !player.pause() {
                    return failed( "nothing is playing" );
                }
                Ok( if player.is_paused() { "Paused".into() } else { "Resumed".into() } )
            }
            Command::Stop => {
                player.stop();
                Ok( "Stopped".into() )
            }
            Command::Next => {
                if !player.next() {
                    return failed( "no next track" );
                }
                Ok( now_playing( player ) )
            }
            Command::Prev => {
                if !player.prev() {
                    return failed( "no previous track" );
                }
                Ok( now_playing( player ) )
            }
            Command::Seek { position } => {
                let length = player.get_length();
                if length == 0 {
                    return failed( "track length unknown" );
                }
                let fraction = position.as_millis() as f64 / length as f64;
                if !player.set_position( fraction as f32 ) {
                    return failed( "seek rejected" );
                }
                Ok( format!( "Seeked to {}", format_time( position.as_millis() as u64 ) ) )
            }
            Command::VolumeUp => Ok( volume_message( player.set_volume( player.volume() as i32 + VOLUME_STEP ) ) ),
            Command::VolumeDown => Ok( volume_message( player.set_volume( player.volume() as i32 - VOLUME_STEP ) ) ),
            Command::Volume { level } => Ok( volume_message( player.set_volume( *level as i32 ) ) ),
            Command::Mute => Ok( if player.toggle_mute() { "Muted".into() } else { "Unmuted".into() } ),
            Command::Mode { mode } => {
                let mode = match mode {
                    Some( mode ) => {
                        player.set_play_mode( *mode );
                        *mode
                    }
                    None => player.cycle_play_mode(),
                };
                Ok( format!( "Play mode: {}", mode ) )
            }
            Command::Status => Ok( status_line( player ) ),
            Command::Help => Ok( help_text().into() ),
            Command::Quit => {
                player.stop();
                Ok( "Bye".into() )
            }
        }
    }
}


fn volume_message( volume: u8 ) -> String {
    format!( "Volume: {}%", volume )
}


fn now_playing( player: &Player ) -> String {
    match player.current_track() {
        Some( track ) => format!( "Now playing: {}", track.server_filename ),
        None => "Now playing".into(),
    }
}


/// Formats milliseconds as `M:SS`.
pub fn format_time( ms: u64 ) -> String {
    let secs = ms / 1000;
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


/// One-line summary of the player state.
pub fn status_line( player: &Player ) -> String {
    let status = player.status();
    let track = status.track
        .as_ref()
        .map( |t| t.server_filename.as_str() )
        .unwrap_or( "-" );
    let position = status.index
        .map( |i| format!( "{}/{}", i + 1, status.playlist_len ) )
        .unwrap_or_else( || format!( "-/{}", status.playlist_len ) );
    let volume = if status.muted { "muted".to_string() } else { format!( "{}%", status.volume ) };

    format!(
        "[{}] {} ({}) {} / {} | vol {} | {}",
        status.state.as_str(),
        track,
        position,
        format_time( status.time_ms ),
        format_time( status.length_ms ),
        volume,
        status.mode,
    )
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        if seconds >= 60 {
            return Err( CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) );
        }
        let total = minutes.checked_mul( 60 )
            .and_then( |m| m.checked_add( seconds ) )
            .ok_or_else( || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) ) )?;
        Ok( Duration::from_secs( total ) )
    } else {
        let seconds: u64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Ok( Duration::from_secs( seconds ) )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Keys:
  space   Pause/resume       n   Next track
  p       Previous track     s   Stop
  + / -   Volume up/down     u   Toggle mute
  m       Cycle play mode    i   Track details
  :       Type a command     q   Quit

Commands:
  play <n>        Play track number n
  seek <time>     Seek to position (e.g., 1:30)
  vol <0-100>     Set volume
  mode [mode]     Set play mode (sequential/loop/random) or cycle
  status          Show player status
  help            Show this help
  quit            Exit panmusic"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_key_bindings() {
        assert_eq!( Command::from_key( ' ' ), Some( Command::Pause ) );
        assert_eq!( Command::from_key( 'n' ), Some( Command::Next ) );
        assert_eq!( Command::from_key( 'p' ), Some( Command::Prev ) );
        assert_eq!( Command::from_key( '+' ), Some( Command::VolumeUp ) );
        assert_eq!( Command::from_key( '-' ), Some( Command::VolumeDown ) );
        assert_eq!( Command::from_key( 'u' ), Some( Command::Mute ) );
        assert_eq!( Command::from_key( 'm' ), Some( Command::Mode { mode: None } ) );
        assert_eq!( Command::from_key( 'i' ), Some( Command::Status ) );
        assert_eq!( Command::from_key( 'q' ), Some( Command::Quit ) );
        assert_eq!( Command::from_key( 'x' ), None );
    }


    #[test]
    fn test_parse_volume() {
        assert_eq!( Command::parse( "vol 40" ).unwrap(), Command::Volume { level: 40 } );
        assert!( matches!( Command::parse( "vol 140" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "volume" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 45 ) } );
        assert!( Command::parse( "seek 1:75" ).is_err() );
    }


    #[test]
    fn test_parse_time_out_of_range() {
        assert!( matches!( parse_time( "307445734561825861:00" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "seek 307445734561825861:59" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert_eq!( parse_time( "1000:00" ).unwrap(), Duration::from_secs( 60_000 ) );
    }


    #[test]
    fn test_parse_mode() {
        assert_eq!( Command::parse( "mode loop" ).unwrap(), Command::Mode { mode: Some( PlayMode::Loop ) } );
        assert_eq!( Command::parse( "MODE" ).unwrap(), Command::Mode { mode: None } );
        assert!( matches!( Command::parse( "mode sideways" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_play_is_one_based() {
        assert_eq!( Command::parse( "play 3" ).unwrap(), Command::Play { index: 2 } );
        assert!( matches!( Command::parse( "play 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "  " ), Err( CommandError::Unknown( _ ) ) ) );
    }


    struct Silent( u8 );

    impl crate::backend::AudioBackend for Silent {
        fn load( &mut self, _path: &std::path::Path ) -> Result<(), crate::backend::BackendError> { Ok(()) }
        fn play( &mut self ) -> Result<(), crate::backend::BackendError> { Ok(()) }
        fn pause( &mut self ) {}
        fn resume( &mut self ) {}
        fn stop( &mut self ) {}
        fn set_volume( &mut self, volume: u8 ) { self.0 = volume; }
        fn volume( &self ) -> u8 { self.0 }
        fn time_ms( &self ) -> u64 { 0 }
        fn length_ms( &self ) -> u64 { 0 }
        fn set_position( &mut self, _position: f32 ) -> Result<(), crate::backend::BackendError> { Ok(()) }
        fn state( &self ) -> crate::backend::BackendState { crate::backend::BackendState::Idle }
    }


    #[test]
    fn test_execute_volume_and_mode() {
        let player = Player::new( Box::new( Silent( 50 ) ), Default::default() );

        assert_eq!( Command::VolumeUp.execute( &player ).unwrap(), "Volume: 55%" );
        assert_eq!( Command::Volume { level: 98 }.execute( &player ).unwrap(), "Volume: 98%" );
        assert_eq!( Command::VolumeUp.execute( &player ).unwrap(), "Volume: 100%" );
        assert_eq!( Command::Mute.execute( &player ).unwrap(), "Muted" );
        assert!( status_line( &player ).contains( "vol muted" ) );

        assert_eq!( Command::Mode { mode: None }.execute( &player ).unwrap(), "Play mode: loop" );
        assert_eq!( player.play_mode(), PlayMode::Loop );
    }


    #[test]
    fn test_execute_without_playback_fails() {
        let player = Player::new( Box::new( Silent( 50 ) ), Default::default() );

        assert!( matches!( Command::Pause.execute( &player ), Err( CommandError::ExecutionFailed( _ ) ) ) );
        assert!( matches!( Command::Next.execute( &player ), Err( CommandError::ExecutionFailed( _ ) ) ) );
        assert!( Command::Seek { position: Duration::from_secs( 5 ) }.execute( &player ).is_err() );
        assert_eq!( Command::Stop.execute( &player ).unwrap(), "Stopped" );
    }


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( 0 ), "0:00" );
        assert_eq!( format_time( 61_500 ), "1:01" );
        assert_eq!( format_time( 3_600_000 ), "60:00" );
    }
}
