//! panmusic CLI - Cloud drive music player

mod cli;
mod mirror;
mod settings;

use std::fs::{ self, OpenOptions };
use std::io::{ self, BufRead, Write };
use std::path::{ Path, PathBuf };
use std::sync::{ mpsc, Arc, Mutex };
use std::time::Duration;

use anyhow::{ bail, Context, Result };
use clap::Parser;
use crossterm::{
    cursor::MoveToColumn,
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    queue,
    terminal::{ disable_raw_mode, enable_raw_mode, Clear, ClearType },
};
use tracing_subscriber::EnvFilter;

use cli::{ Args, Commands, PlaylistCommand };
use mirror::MirrorResolver;
use settings::Settings;

use panmusic_core::{
    command::{ self, status_line },
    ChannelObserver, Command, DeviceBackend, Player, PlayerEvent, Playlist, PlaylistStore, TrackReference,
    TrackResolver,
};


fn main() -> Result<()> {
    let args = Args::parse();
    let ( settings, warning ) = Settings::load( args.config.as_deref() );
    init_logging( args.verbose, &settings.log_level )?;
    if let Some( warning ) = warning {
        tracing::warn!( "{}", warning );
    }

    let store = match &settings.playlist_dir {
        Some( dir ) => PlaylistStore::open( dir ),
        None => PlaylistStore::open_default(),
    }.context( "failed to open playlist store" )?;

    match args.command {
        Commands::Playlist( cmd ) => run_playlist_command( &settings, &store, cmd ),
        Commands::Play { playlist, index, mode } => {
            let mode = mode.unwrap_or( settings.play_mode );
            run_play_session( settings, args.config, store, &playlist, index, mode )
        }
    }
}


/// Sends logs to `panmusic.log` in the data directory, or to stderr when verbose.
fn init_logging( verbose: bool, level: &str ) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( level ) );

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter( filter )
            .with_writer( io::stderr )
            .init();
        return Ok(());
    }

    let dir = dirs::data_local_dir()
        .context( "could not determine data directory" )?
        .join( "panmusic" );
    fs::create_dir_all( &dir ).with_context( || format!( "create {}", dir.display() ) )?;

    let log_path = dir.join( "panmusic.log" );
    let file = OpenOptions::new()
        .create( true )
        .append( true )
        .open( &log_path )
        .with_context( || format!( "open log file {}", log_path.display() ) )?;

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_ansi( false )
        .with_writer( Mutex::new( file ) )
        .init();
    Ok(())
}


fn run_playlist_command( settings: &Settings, store: &PlaylistStore, cmd: PlaylistCommand ) -> Result<()> {
    match cmd {
        PlaylistCommand::List { json } => {
            let playlists = store.list_all();
            if json {
                println!( "{}", serde_json::to_string_pretty( &playlists )? );
                return Ok(());
            }
            if playlists.is_empty() {
                println!( "No playlists" );
            }
            for p in &playlists {
                println!( "{:<30} {:>4} tracks  {}", p.name, p.len(), p.description );
            }
        }

        PlaylistCommand::Show { name, json } => {
            let playlist = load( store, &name )?;
            if json {
                println!( "{}", serde_json::to_string_pretty( &playlist )? );
            } else {
                print_playlist( &playlist );
            }
        }

        PlaylistCommand::Create { name, description } => {
            if store.create( &name, &description ).is_none() {
                bail!( "playlist '{}' already exists or could not be written", name );
            }
            println!( "Created playlist '{}'", name );
        }

        PlaylistCommand::Delete { name, force } => {
            load( store, &name )?;
            if !force && !confirm( &format!( "Delete playlist '{}'?", name ), &mut io::stdin().lock() )? {
                println!( "Cancelled" );
                return Ok(());
            }
            if !store.delete( &name ) {
                bail!( "could not delete playlist '{}'", name );
            }
            println!( "Deleted playlist '{}'", name );
        }

        PlaylistCommand::Add { name, file } => {
            load( store, &name )?;
            let tracks = read_file_info( &file )?;
            let total = tracks.len();

            let mut added = 0;
            for track in tracks.into_iter().filter( TrackReference::is_audio ) {
                if store.add_item( &name, track.stamped() ) {
                    added += 1;
                }
            }
            println!( "Added {} of {} entries to '{}'", added, total, name );
        }

        PlaylistCommand::Remove { name, fs_ids } => {
            load( store, &name )?;
            let removed = fs_ids.iter().filter( |id| store.remove_item( &name, **id ) ).count();
            println!( "Removed {} tracks from '{}'", removed, name );
        }

        PlaylistCommand::Clear { name, force } => {
            load( store, &name )?;
            if !force && !confirm( &format!( "Remove every track from '{}'?", name ), &mut io::stdin().lock() )? {
                println!( "Cancelled" );
                return Ok(());
            }
            if !store.clear( &name ) {
                bail!( "could not clear playlist '{}'", name );
            }
            println!( "Cleared '{}'", name );
        }

        PlaylistCommand::Sort { name, key, desc } => {
            if !store.sort( &name, key, desc ) {
                bail!( "could not sort playlist '{}'", name );
            }
            print_playlist( &load( store, &name )? );
        }

        PlaylistCommand::Verify { name, auto_refresh } => {
            let resolver = mirror_resolver( settings )?;
            println!( "Verifying '{}'...", name );
            let report = verify_playlist( store, &resolver, &name, auto_refresh )?;

            for track in &report.invalid {
                println!( "  invalid: {}", track );
            }
            if !report.refreshed.is_empty() {
                println!( "Refreshed {} tracks", report.refreshed.len() );
            }
            if report.invalid.is_empty() {
                println!( "All tracks in '{}' are valid", name );
            } else if !auto_refresh {
                println!( "{} invalid tracks in '{}'; rerun with --auto-refresh to refresh them", report.invalid.len(), name );
            }
        }

        PlaylistCommand::Recent { json } => {
            let recent = store.recent();
            if json {
                println!( "{}", serde_json::to_string_pretty( &recent )? );
            } else {
                print_playlist( &recent );
            }
        }
    }
    Ok(())
}


fn load( store: &PlaylistStore, name: &str ) -> Result<Playlist> {
    store.get( name ).with_context( || format!( "playlist '{}' not found", name ) )
}


/// Asks a yes/no question; anything but "y" or "yes" declines.
fn confirm( question: &str, input: &mut impl BufRead ) -> Result<bool> {
    print!( "{} [y/N] ", question );
    io::stdout().flush()?;

    let mut answer = String::new();
    input.read_line( &mut answer )?;
    Ok( matches!( answer.trim().to_lowercase().as_str(), "y" | "yes" ) )
}


fn mirror_resolver( settings: &Settings ) -> Result<MirrorResolver> {
    let Some( mirror_url ) = settings.mirror_url.as_deref() else {
        bail!( "no mirror_url configured; set it in {:?}", Settings::settings_path().unwrap_or_default() );
    };
    MirrorResolver::new(
        mirror_url,
        &settings.user_agent,
        Duration::from_secs( settings.connect_timeout_secs + settings.read_timeout_secs ),
    )
}


/// Outcome of checking a playlist against the resolver.
#[derive( Debug, Default )]
struct VerifyReport {
    invalid: Vec<String>,
    refreshed: Vec<String>,
}


/// Checks every track of `name`, optionally replacing stale ones with
/// refreshed references. The playlist is saved once if anything changed.
fn verify_playlist(
    store: &PlaylistStore,
    resolver: &dyn TrackResolver,
    name: &str,
    auto_refresh: bool,
) -> Result<VerifyReport> {
    let mut playlist = load( store, name )?;
    let mut report = VerifyReport::default();

    for index in 0..playlist.len() {
        let Some( track ) = playlist.get( index ).cloned() else { break };
        if resolver.is_valid( &track ) {
            continue;
        }
        tracing::warn!( "Invalid track in {}: {}", name, track.server_filename );
        report.invalid.push( track.server_filename.clone() );

        if !auto_refresh {
            continue;
        }
        match resolver.refresh( &track ) {
            Some( fresh ) => {
                playlist.replace( index, fresh );
                report.refreshed.push( track.server_filename );
            }
            None => tracing::warn!( "Could not refresh {}", track.server_filename ),
        }
    }

    if !report.refreshed.is_empty() {
        store.save( &mut playlist ).context( "failed to save refreshed playlist" )?;
    }
    Ok( report )
}


fn print_playlist( playlist: &Playlist ) {
    println!( "{} ({} tracks)", playlist.name, playlist.len() );
    if !playlist.description.is_empty() {
        println!( "  {}", playlist.description );
    }
    for ( i, track ) in playlist.items.iter().enumerate() {
        println!(
            "{:>4}. {:<50} {:>8}  {}",
            i + 1,
            track.server_filename,
            format_size( track.size ),
            track.fs_id
        );
    }
}


fn format_size( bytes: u64 ) -> String {
    const UNITS: [&str; 4] = [ "B", "KB", "MB", "GB" ];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!( "{} B", bytes )
    } else {
        format!( "{:.1} {}", size, UNITS[ unit ] )
    }
}


/// Reads drive file-info records: one object, an array, or a listing
/// response with a `list` array.
fn read_file_info( path: &Path ) -> Result<Vec<TrackReference>> {
    let contents = fs::read_to_string( path )
        .with_context( || format!( "read {}", path.display() ) )?;
    parse_file_info( &contents ).with_context( || format!( "parse {}", path.display() ) )
}


fn parse_file_info( contents: &str ) -> Result<Vec<TrackReference>> {
    let value: serde_json::Value = serde_json::from_str( contents )?;
    let value = match value {
        serde_json::Value::Object( mut map ) if map.contains_key( "list" ) => map.remove( "list" ).unwrap_or_default(),
        other => other,
    };

    Ok( match value {
        serde_json::Value::Array( _ ) => serde_json::from_value( value )?,
        _ => vec![ serde_json::from_value( value )? ],
    })
}


fn run_play_session(
    mut settings: Settings,
    config: Option<PathBuf>,
    store: PlaylistStore,
    name: &str,
    index: usize,
    mode: panmusic_core::PlayMode,
) -> Result<()> {
    let resolver = mirror_resolver( &settings )?;

    let playlist = load( &store, name )?;
    if playlist.is_empty() {
        bail!( "playlist '{}' is empty", name );
    }

    let ( tx, rx ) = mpsc::channel();
    let player = Player::new( Box::new( DeviceBackend::new() ), settings.player_options() )
        .with_resolver( Arc::new( resolver ) )
        .with_store( store.clone() )
        .with_observer( Arc::new( ChannelObserver::new( tx ) ) );

    let shared = player.set_playlist_owned( playlist.clone() );
    player.set_play_mode( mode );
    player.set_volume( settings.volume as i32 );

    println!( "Loading {}...", name );
    if !player.play( index ) {
        bail!( "failed to start playback (see the log for details)" );
    }

    enable_raw_mode()?;
    let result = interactive_loop( &player, &rx );
    disable_raw_mode()?;
    println!();

    player.shutdown();

    if settings.remember_session( player.volume(), player.play_mode() ) {
        settings.save( config.as_deref() );
    }

    // Refreshed track references are written back
    let mut updated = shared.read().unwrap_or_else( std::sync::PoisonError::into_inner ).clone();
    if serde_json::to_value( &updated.items )? != serde_json::to_value( &playlist.items )? {
        store.save( &mut updated ).context( "failed to save refreshed playlist" )?;
    }

    result
}


/// Typed-command state of the interactive session.
#[derive( Default )]
struct Prompt {
    input: Option<String>,
    message: Option<String>,
}


fn interactive_loop( player: &Player, rx: &mpsc::Receiver<PlayerEvent> ) -> Result<()> {
    let mut prompt = Prompt::default();
    let mut stdout = io::stdout();

    loop {
        for event in rx.try_iter() {
            prompt.message = match event {
                PlayerEvent::Play( track ) | PlayerEvent::Next( track ) | PlayerEvent::Prev( track ) => {
                    Some( format!( "Now playing: {}", track.server_filename ) )
                }
                PlayerEvent::Complete => Some( "Track finished".into() ),
                PlayerEvent::Stop => Some( "Stopped".into() ),
                PlayerEvent::Pause => Some( "Paused".into() ),
            };
        }

        render( &mut stdout, player, &prompt )?;

        if !event::poll( Duration::from_millis( 100 ) )? {
            continue;
        }
        let Event::Key( key ) = event::read()? else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        let command = if key.modifiers.contains( KeyModifiers::CONTROL ) && key.code == KeyCode::Char( 'c' ) {
            Some( Command::Quit )
        } else if let Some( input ) = prompt.input.as_mut() {
            match key.code {
                KeyCode::Char( c ) => {
                    input.push( c );
                    None
                }
                KeyCode::Backspace => {
                    input.pop();
                    None
                }
                KeyCode::Esc => {
                    prompt.input = None;
                    None
                }
                KeyCode::Enter => {
                    let line = prompt.input.take().unwrap_or_default();
                    match Command::parse( &line ) {
                        Ok( cmd ) => Some( cmd ),
                        Err( e ) => {
                            prompt.message = Some( e.to_string() );
                            None
                        }
                    }
                }
                _ => None,
            }
        } else {
            match key.code {
                KeyCode::Char( ':' ) => {
                    prompt.input = Some( String::new() );
                    None
                }
                KeyCode::Char( c ) => Command::from_key( c ),
                KeyCode::Esc => Some( Command::Quit ),
                _ => None,
            }
        };

        let Some( command ) = command else { continue };
        if matches!( command, Command::Next | Command::Prev | Command::Play { .. } ) {
            prompt.message = Some( "Buffering...".into() );
            render( &mut stdout, player, &prompt )?;
        }

        match command.execute( player ) {
            Ok( message ) if command == Command::Help => {
                print_block( &mut stdout, message.as_str() )?;
            }
            Ok( message ) if command == Command::Status => {
                print_block( &mut stdout, &track_details( player, &message ) )?;
            }
            Ok( message ) => prompt.message = Some( message ),
            Err( e ) => prompt.message = Some( e.to_string() ),
        }

        if command == Command::Quit {
            return Ok(());
        }
    }
}


fn render( stdout: &mut io::Stdout, player: &Player, prompt: &Prompt ) -> Result<()> {
    let line = match ( &prompt.input, &prompt.message ) {
        ( Some( input ), _ ) => format!( ":{}", input ),
        ( None, Some( message ) ) => format!( "{} | {}", status_line( player ), message ),
        ( None, None ) => status_line( player ),
    };

    queue!( stdout, MoveToColumn( 0 ), Clear( ClearType::CurrentLine ) )?;
    write!( stdout, "{}", line )?;
    stdout.flush()?;
    Ok(())
}


/// Prints multi-line text above the status line while in raw mode.
fn print_block( stdout: &mut io::Stdout, text: &str ) -> Result<()> {
    queue!( stdout, MoveToColumn( 0 ), Clear( ClearType::CurrentLine ) )?;
    for line in text.lines() {
        write!( stdout, "{}\r\n", line )?;
    }
    stdout.flush()?;
    Ok(())
}


fn track_details( player: &Player, status: &str ) -> String {
    let mut out = String::from( status );
    if let Some( track ) = player.current_track() {
        out.push_str( &format!( "\n  Path: {}\n  Size: {}", track.path, format_size( track.size ) ) );
    }
    if let Some( metadata ) = player.metadata() {
        for ( label, value ) in metadata.entries() {
            out.push_str( &format!( "\n  {}: {}", label, value ) );
        }
    }
    let position = player.get_position();
    if position > 0.0 {
        out.push_str( &format!( "\n  Position: {} ({:.0}%)", command::format_time( player.get_time() ), position * 100.0 ) );
    }
    out
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::{ Cursor, Read };
    use std::net::TcpListener;
    use std::thread;


    /// Answers one request per connection with `responses`, in order.
    fn serve( responses: Vec<&'static str> ) -> String {
        let listener = TcpListener::bind( "127.0.0.1:0" ).unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn( move || {
            for response in responses {
                let ( mut stream, _ ) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read( &mut buf );
                stream.write_all( response.as_bytes() ).unwrap();
            }
        });
        format!( "http://{}/drive/", addr )
    }


    fn store_with_track( dir: &Path ) -> PlaylistStore {
        let store = PlaylistStore::open( dir ).unwrap();
        store.create( "demo", "" ).unwrap();
        assert!( store.add_item( "demo", TrackReference::new( 1, "a.mp3", "/a.mp3", 7 ) ) );
        store
    }


    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";


    #[test]
    fn test_verify_refreshes_stale_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_track( dir.path() );
        let base = serve( vec![
            NOT_FOUND,
            "HTTP/1.1 200 OK\r\nContent-Length: 4096\r\nConnection: close\r\n\r\n",
        ]);
        let resolver = MirrorResolver::new( &base, "pan.baidu.com", Duration::from_secs( 5 ) ).unwrap();

        let report = verify_playlist( &store, &resolver, "demo", true ).unwrap();
        assert_eq!( report.invalid, vec![ "a.mp3".to_string() ] );
        assert_eq!( report.refreshed, vec![ "a.mp3".to_string() ] );

        let saved = store.get( "demo" ).unwrap();
        assert_eq!( saved.len(), 1 );
        assert_eq!( saved.items[ 0 ].fs_id, 1 );
        assert_eq!( saved.items[ 0 ].size, 4096 );
    }


    #[test]
    fn test_verify_without_refresh_leaves_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_track( dir.path() );
        let base = serve( vec![ NOT_FOUND ] );
        let resolver = MirrorResolver::new( &base, "pan.baidu.com", Duration::from_secs( 5 ) ).unwrap();

        let report = verify_playlist( &store, &resolver, "demo", false ).unwrap();
        assert_eq!( report.invalid.len(), 1 );
        assert!( report.refreshed.is_empty() );
        assert_eq!( store.get( "demo" ).unwrap().items[ 0 ].size, 7 );

        assert!( verify_playlist( &store, &resolver, "missing", false ).is_err() );
    }


    #[test]
    fn test_confirm_defaults_to_no() {
        assert!( confirm( "Delete?", &mut Cursor::new( "y\n" ) ).unwrap() );
        assert!( confirm( "Delete?", &mut Cursor::new( " YES \n" ) ).unwrap() );
        assert!( !confirm( "Delete?", &mut Cursor::new( "\n" ) ).unwrap() );
        assert!( !confirm( "Delete?", &mut Cursor::new( "" ) ).unwrap() );
    }


    #[test]
    fn test_parse_file_info_shapes() {
        let single = r#"{ "fs_id": 1, "server_filename": "a.mp3", "path": "/a.mp3", "size": 10 }"#;
        assert_eq!( parse_file_info( single ).unwrap().len(), 1 );

        let array = r#"[
            { "fs_id": 1, "server_filename": "a.mp3", "path": "/a.mp3", "size": 10 },
            { "fs_id": 2, "server_filename": "b", "path": "/b", "size": 0, "isdir": 1 }
        ]"#;
        let tracks = parse_file_info( array ).unwrap();
        assert_eq!( tracks.len(), 2 );
        assert_eq!( tracks.iter().filter( |t| t.is_audio() ).count(), 1 );

        let listing = r#"{ "errno": 0, "list": [ { "fs_id": 9, "server_filename": "c.flac", "path": "/c.flac", "size": 5, "md5": "abc" } ] }"#;
        let tracks = parse_file_info( listing ).unwrap();
        assert_eq!( tracks[ 0 ].fs_id, 9 );
        assert_eq!( tracks[ 0 ].md5, "abc" );
    }


    #[test]
    fn test_parse_file_info_rejects_garbage() {
        assert!( parse_file_info( "[1, 2]" ).is_err() );
        assert!( parse_file_info( "nope" ).is_err() );
    }


    #[test]
    fn test_format_size() {
        assert_eq!( format_size( 512 ), "512 B" );
        assert_eq!( format_size( 2048 ), "2.0 KB" );
        assert_eq!( format_size( 5 * 1024 * 1024 ), "5.0 MB" );
    }
}
