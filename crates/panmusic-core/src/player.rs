//! Playback engine
//!
//! The Player owns the single active playback session: it validates and
//! materializes remote tracks, drives the audio backend, advances through the
//! playlist according to the play mode, and notifies observers.
//!
//! Two locks guard the engine. `transport` serializes transport commands
//! (including the inline download) and `session` guards the session fields.
//! Getters and the poll tick's end-of-track check only take `session`.
//! Observers run after both are released.

use std::sync::{ Arc, Mutex, MutexGuard, PoisonError, RwLock };
use std::time::Duration;

use tempfile::TempPath;

use crate::backend::{ AudioBackend, BackendState };
use crate::decoder::AudioMetadata;
use crate::event_loop::EventLoop;
use crate::materialize::{ materialize, FetchPolicy };
use crate::mode::PlayMode;
use crate::observer::{ ObserverRegistry, PlayerEvent, PlayerObserver };
use crate::playlist::{ Playlist, PlaylistStore };
use crate::resolver::TrackResolver;
use crate::track::TrackReference;


/// Current playback state.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackState {
    /// No playlist or no current track.
    #[default]
    Idle,
    /// Materializing the current track.
    Loading,
    Playing,
    Paused,
    Stopped,
}


impl PlaybackState {
    pub fn as_str( self ) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}


/// Tuning knobs for a [`Player`].
#[derive( Debug, Clone )]
pub struct PlayerOptions {
    pub fetch: FetchPolicy,
    /// Interval of the end-of-track poll loop
    pub poll_interval: Duration,
    /// How long shutdown waits for the poll loop
    pub join_timeout: Duration,
    /// Play the requested index even in random mode
    pub honor_index_in_random: bool,
}


impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            fetch: FetchPolicy::default(),
            poll_interval: Duration::from_millis( 500 ),
            join_timeout: Duration::from_secs( 1 ),
            honor_index_in_random: false,
        }
    }
}


/// Point-in-time view of the player.
#[derive( Debug, Clone )]
pub struct PlayerStatus {
    pub state: PlaybackState,
    pub track: Option<TrackReference>,
    pub index: Option<usize>,
    pub playlist: Option<String>,
    pub playlist_len: usize,
    pub mode: PlayMode,
    pub volume: u8,
    pub muted: bool,
    pub time_ms: u64,
    pub length_ms: u64,
}


struct Session {
    playlist: Option<Arc<RwLock<Playlist>>>,
    index: Option<usize>,
    track: Option<TrackReference>,
    playing: bool,
    paused: bool,
    state: PlaybackState,
    mode: PlayMode,
    scratch: Option<TempPath>,
    backend: Box<dyn AudioBackend>,
    volume: u8,
    muted: bool,
    /// Bumped by every transport command
    generation: u64,
}


impl Session {
    fn effective_volume( &self ) -> u8 {
        if self.muted { 0 } else { self.volume }
    }


    fn playlist_len( &self ) -> usize {
        self.playlist.as_ref().map_or( 0, |p| read_playlist( p ).len() )
    }
}


impl Drop for Session {
    fn drop( &mut self ) {
        if self.playing || self.scratch.is_some() {
            self.backend.stop();
        }
        if let Some( scratch ) = self.scratch.take() {
            discard( scratch );
        }
    }
}


fn read_playlist( playlist: &RwLock<Playlist> ) -> std::sync::RwLockReadGuard<'_, Playlist> {
    playlist.read().unwrap_or_else( PoisonError::into_inner )
}


fn discard( scratch: TempPath ) {
    let path = scratch.to_path_buf();
    match scratch.close() {
        Ok(()) => tracing::debug!( "Removed scratch file {:?}", path ),
        Err( e ) => tracing::error!( "Failed to remove scratch file {:?}: {}", path, e ),
    }
}


struct Shared {
    transport: Mutex<()>,
    session: Mutex<Session>,
    resolver: RwLock<Option<Arc<dyn TrackResolver>>>,
    store: RwLock<Option<PlaylistStore>>,
    observers: ObserverRegistry,
    options: PlayerOptions,
    poller: Mutex<Option<EventLoop>>,
}


impl Shared {
    fn transport( &self ) -> MutexGuard<'_, ()> {
        self.transport.lock().unwrap_or_else( PoisonError::into_inner )
    }


    fn session( &self ) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else( PoisonError::into_inner )
    }


    fn emit( &self, events: Vec<PlayerEvent> ) {
        for event in &events {
            self.observers.dispatch( event );
        }
    }


    fn fail( &self, message: std::fmt::Arguments<'_> ) -> Option<TrackReference> {
        tracing::error!( "{}", message );
        self.session().state = PlaybackState::Stopped;
        None
    }


    /// Plays the track at `requested`. The caller holds the transport lock.
    ///
    /// `explicit` marks a user-requested index, which random mode replaces
    /// with its own pick unless configured otherwise.
    fn play_locked(
        self: &Arc<Self>,
        requested: usize,
        explicit: bool,
        events: &mut Vec<PlayerEvent>,
    ) -> Option<TrackReference> {
        let ( playlist, index ) = {
            let session = self.session();
            let Some( playlist ) = session.playlist.clone() else {
                tracing::warn!( "No playlist set" );
                return None;
            };

            let len = read_playlist( &playlist ).len();
            if len == 0 {
                tracing::warn!( "Playlist is empty" );
                return None;
            }
            if requested >= len {
                tracing::warn!( "Invalid play index: {}", requested );
                return None;
            }

            let index = match session.mode {
                PlayMode::Random if explicit && !self.options.honor_index_in_random => {
                    session.mode.policy().start_index( requested, session.index, len )
                }
                _ => requested,
            };
            ( playlist, index )
        };

        self.stop_locked( events );

        let track = read_playlist( &playlist ).get( index ).cloned();
        let Some( mut track ) = track else {
            return self.fail( format_args!( "Track {} vanished from the playlist", index ) );
        };

        {
            let mut session = self.session();
            session.index = Some( index );
            session.track = Some( track.clone() );
            session.state = PlaybackState::Loading;
        }

        let resolver = self.resolver.read().unwrap_or_else( PoisonError::into_inner ).clone();
        let Some( resolver ) = resolver else {
            return self.fail( format_args!( "No track resolver configured" ) );
        };

        if !resolver.is_valid( &track ) {
            tracing::warn!( "Track no longer valid, refreshing: {}", track.server_filename );
            let Some( fresh ) = resolver.refresh( &track ) else {
                return self.fail( format_args!( "Track could not be refreshed: {}", track.server_filename ) );
            };
            playlist.write().unwrap_or_else( PoisonError::into_inner ).replace( index, fresh.clone() );
            self.session().track = Some( fresh.clone() );
            track = fresh;
        }

        let url = match resolver.resolve_download_url( &track ) {
            Ok( url ) => url,
            Err( e ) => return self.fail( format_args!( "Failed to resolve {}: {}", track.server_filename, e ) ),
        };

        tracing::info!( "Loading: {}", track.server_filename );
        let extension = track.extension();
        let scratch = match materialize( &url, &resolver.request_headers(), extension.as_deref(), &self.options.fetch ) {
            Ok( scratch ) => scratch,
            Err( e ) => return self.fail( format_args!( "Failed to download {}: {}", track.server_filename, e ) ),
        };

        {
            let mut session = self.session();
            let volume = session.effective_volume();

            let started = session.backend.load( &scratch ).and_then( |()| {
                session.backend.set_volume( volume );
                session.backend.play()
            });
            if let Err( e ) = started {
                session.backend.stop();
                session.state = PlaybackState::Stopped;
                drop( session );
                discard( scratch );
                tracing::error!( "Failed to start playback of {}: {}", track.server_filename, e );
                return None;
            }

            session.scratch = Some( scratch );
            session.playing = true;
            session.paused = false;
            session.state = PlaybackState::Playing;
        }

        tracing::info!( "Playing: {}", track.server_filename );

        if let Some( store ) = self.store.read().unwrap_or_else( PoisonError::into_inner ).as_ref() {
            store.record_recently_played( &track );
        }

        self.ensure_poller();
        events.push( PlayerEvent::Play( track.clone() ) );
        Some( track )
    }


    /// Tears down the current session. The caller holds the transport lock.
    fn stop_locked( &self, events: &mut Vec<PlayerEvent> ) -> bool {
        let mut session = self.session();
        session.generation += 1;

        if !session.playing && session.scratch.is_none() {
            session.paused = false;
            return true;
        }

        let was_playing = session.playing;
        session.backend.stop();
        session.playing = false;
        session.paused = false;
        session.state = PlaybackState::Stopped;
        let scratch = session.scratch.take();
        drop( session );

        if let Some( scratch ) = scratch {
            discard( scratch );
        }
        if was_playing {
            tracing::info!( "Playback stopped" );
            events.push( PlayerEvent::Stop );
        }
        true
    }


    fn step_locked( self: &Arc<Self>, forward: bool, events: &mut Vec<PlayerEvent> ) -> bool {
        let ( current, len, mode ) = {
            let session = self.session();
            ( session.index, session.playlist_len(), session.mode )
        };

        let policy = mode.policy();
        let target = if forward {
            policy.next_index( current, len )
        } else {
            policy.prev_index( current, len )
        };

        let Some( index ) = target else {
            tracing::info!( "No {} track in {} mode", if forward { "next" } else { "previous" }, mode );
            return false;
        };

        match self.play_locked( index, false, events ) {
            Some( track ) if forward => events.push( PlayerEvent::Next( track ) ),
            Some( track ) => events.push( PlayerEvent::Prev( track ) ),
            None => return false,
        }
        true
    }


    fn ensure_poller( self: &Arc<Self> ) {
        let mut poller = self.poller.lock().unwrap_or_else( PoisonError::into_inner );
        if poller.as_ref().is_some_and( |p| p.is_running() ) {
            return;
        }

        let weak = Arc::downgrade( self );
        let spawned = EventLoop::spawn( self.options.poll_interval, move || {
            match weak.upgrade() {
                Some( shared ) => {
                    shared.poll_tick();
                    true
                }
                None => false,
            }
        });

        match spawned {
            Ok( event_loop ) => *poller = Some( event_loop ),
            Err( e ) => tracing::error!( "Failed to start poll loop: {}", e ),
        }
    }


    /// Detects the end of the current track and advances to the next one.
    fn poll_tick( self: &Arc<Self> ) {
        let generation = {
            let mut session = self.session();
            if !session.playing || session.paused || session.backend.state() != BackendState::Ended {
                return;
            }
            session.playing = false;
            session.state = PlaybackState::Stopped;
            session.generation
        };

        tracing::info!( "Track completed" );
        self.observers.dispatch( &PlayerEvent::Complete );

        let mut events = Vec::new();
        {
            let _transport = self.transport();
            if self.session().generation != generation {
                tracing::debug!( "Auto-advance superseded by a transport command" );
                return;
            }
            if !self.step_locked( true, &mut events ) {
                self.stop_locked( &mut events );
            }
        }
        self.emit( events );
    }
}


/// Audio player driving one playlist at a time.
pub struct Player {
    inner: Arc<Shared>,
}


impl Player {
    /// Creates a player around an audio backend.
    pub fn new( backend: Box<dyn AudioBackend>, options: PlayerOptions ) -> Self {
        let volume = backend.volume().min( 100 );
        Self {
            inner: Arc::new( Shared {
                transport: Mutex::new(()),
                session: Mutex::new( Session {
                    playlist: None,
                    index: None,
                    track: None,
                    playing: false,
                    paused: false,
                    state: PlaybackState::Idle,
                    mode: PlayMode::default(),
                    scratch: None,
                    backend,
                    volume,
                    muted: false,
                    generation: 0,
                }),
                resolver: RwLock::new( None ),
                store: RwLock::new( None ),
                observers: ObserverRegistry::new(),
                options,
                poller: Mutex::new( None ),
            }),
        }
    }


    pub fn with_resolver( self, resolver: Arc<dyn TrackResolver> ) -> Self {
        self.set_resolver( resolver );
        self
    }


    /// Records every started track into the store's recently played list.
    pub fn with_store( self, store: PlaylistStore ) -> Self {
        *self.inner.store.write().unwrap_or_else( PoisonError::into_inner ) = Some( store );
        self
    }


    pub fn with_observer( self, observer: Arc<dyn PlayerObserver> ) -> Self {
        self.add_observer( observer );
        self
    }


    pub fn set_resolver( &self, resolver: Arc<dyn TrackResolver> ) {
        *self.inner.resolver.write().unwrap_or_else( PoisonError::into_inner ) = Some( resolver );
    }


    pub fn add_observer( &self, observer: Arc<dyn PlayerObserver> ) {
        self.inner.observers.register( observer );
    }


    /// Replaces the playlist, stopping any current playback.
    pub fn set_playlist( &self, playlist: Arc<RwLock<Playlist>> ) {
        let mut events = Vec::new();
        {
            let _transport = self.inner.transport();
            self.inner.stop_locked( &mut events );

            let mut session = self.inner.session();
            tracing::info!( "Playlist set: {}", read_playlist( &playlist ).name );
            session.playlist = Some( playlist );
            session.index = None;
            session.track = None;
            session.state = PlaybackState::Idle;
        }
        self.inner.emit( events );
    }


    /// Takes ownership of `playlist` and returns the shared handle.
    pub fn set_playlist_owned( &self, playlist: Playlist ) -> Arc<RwLock<Playlist>> {
        let shared = Arc::new( RwLock::new( playlist ) );
        self.set_playlist( Arc::clone( &shared ) );
        shared
    }


    pub fn playlist( &self ) -> Option<Arc<RwLock<Playlist>>> {
        self.inner.session().playlist.clone()
    }


    /// Plays the track at `index`.
    ///
    /// @param index - Position in the current playlist
    ///
    /// @returns true if playback started
    pub fn play( &self, index: usize ) -> bool {
        let mut events = Vec::new();
        let started = {
            let _transport = self.inner.transport();
            self.inner.play_locked( index, true, &mut events ).is_some()
        };
        self.inner.emit( events );
        started
    }


    /// Toggles between playing and paused. Returns false if nothing is playing.
    pub fn pause( &self ) -> bool {
        let event = {
            let _transport = self.inner.transport();
            let mut session = self.inner.session();
            if !session.playing {
                return false;
            }
            session.generation += 1;

            if session.paused {
                session.backend.resume();
                session.paused = false;
                session.state = PlaybackState::Playing;
                tracing::info!( "Playback resumed" );
                session.track.clone().map( PlayerEvent::Play )
            } else {
                session.backend.pause();
                session.paused = true;
                session.state = PlaybackState::Paused;
                tracing::info!( "Playback paused" );
                Some( PlayerEvent::Pause )
            }
        };
        self.inner.emit( event.into_iter().collect() );
        true
    }


    /// Stops playback and removes the scratch file. Safe to call repeatedly.
    pub fn stop( &self ) -> bool {
        let mut events = Vec::new();
        let stopped = {
            let _transport = self.inner.transport();
            self.inner.stop_locked( &mut events )
        };
        self.inner.emit( events );
        stopped
    }


    pub fn next( &self ) -> bool {
        self.step( true )
    }


    pub fn prev( &self ) -> bool {
        self.step( false )
    }


    fn step( &self, forward: bool ) -> bool {
        let mut events = Vec::new();
        let moved = {
            let _transport = self.inner.transport();
            self.inner.step_locked( forward, &mut events )
        };
        self.inner.emit( events );
        moved
    }


    /// Sets the volume, clamped to 0-100, and returns the applied value.
    pub fn set_volume( &self, volume: i32 ) -> u8 {
        let volume = volume.clamp( 0, 100 ) as u8;
        let mut session = self.inner.session();
        session.volume = volume;
        session.muted = false;
        session.backend.set_volume( volume );
        volume
    }


    pub fn volume( &self ) -> u8 {
        self.inner.session().volume
    }


    /// Toggles mute and returns the new mute state. The volume is kept.
    pub fn toggle_mute( &self ) -> bool {
        let mut session = self.inner.session();
        session.muted = !session.muted;
        let volume = session.effective_volume();
        session.backend.set_volume( volume );
        session.muted
    }


    pub fn is_muted( &self ) -> bool {
        self.inner.session().muted
    }


    /// Elapsed time of the current track in milliseconds.
    pub fn get_time( &self ) -> u64 {
        let session = self.inner.session();
        if session.playing { session.backend.time_ms() } else { 0 }
    }


    /// Length of the current track in milliseconds.
    pub fn get_length( &self ) -> u64 {
        let session = self.inner.session();
        if session.playing { session.backend.length_ms() } else { 0 }
    }


    /// Position in the current track (0.0 to 1.0).
    pub fn get_position( &self ) -> f32 {
        let session = self.inner.session();
        if session.playing { session.backend.position() } else { 0.0 }
    }


    /// Seeks to a fraction of the current track.
    pub fn set_position( &self, position: f32 ) -> bool {
        let mut session = self.inner.session();
        if !session.playing {
            return false;
        }

        match session.backend.set_position( position.clamp( 0.0, 1.0 ) ) {
            Ok(()) => true,
            Err( e ) => {
                tracing::warn!( "Seek failed: {}", e );
                false
            }
        }
    }


    pub fn set_play_mode( &self, mode: PlayMode ) {
        tracing::info!( "Play mode: {}", mode );
        self.inner.session().mode = mode;
    }


    pub fn play_mode( &self ) -> PlayMode {
        self.inner.session().mode
    }


    /// Switches to the next play mode and returns it.
    pub fn cycle_play_mode( &self ) -> PlayMode {
        let mode = self.play_mode().cycle();
        self.set_play_mode( mode );
        mode
    }


    pub fn state( &self ) -> PlaybackState {
        self.inner.session().state
    }


    pub fn is_playing( &self ) -> bool {
        self.inner.session().playing
    }


    pub fn is_paused( &self ) -> bool {
        self.inner.session().paused
    }


    pub fn current_track( &self ) -> Option<TrackReference> {
        self.inner.session().track.clone()
    }


    pub fn current_index( &self ) -> Option<usize> {
        self.inner.session().index
    }


    /// Tags of the current track, if the backend exposes them.
    pub fn metadata( &self ) -> Option<AudioMetadata> {
        let session = self.inner.session();
        if session.playing { session.backend.metadata() } else { None }
    }


    pub fn status( &self ) -> PlayerStatus {
        let session = self.inner.session();
        let ( playlist, playlist_len ) = match &session.playlist {
            Some( p ) => {
                let p = read_playlist( p );
                ( Some( p.name.clone() ), p.len() )
            }
            None => ( None, 0 ),
        };

        PlayerStatus {
            state: session.state,
            track: session.track.clone(),
            index: session.index,
            playlist,
            playlist_len,
            mode: session.mode,
            volume: session.volume,
            muted: session.muted,
            time_ms: if session.playing { session.backend.time_ms() } else { 0 },
            length_ms: if session.playing { session.backend.length_ms() } else { 0 },
        }
    }


    /// Stops the poll loop and the current session.
    pub fn shutdown( &self ) {
        let timeout = self.inner.options.join_timeout;
        let poller = self.inner.poller.lock().unwrap_or_else( PoisonError::into_inner ).take();
        if let Some( event_loop ) = &poller {
            event_loop.signal();
        }

        self.stop();

        if let Some( event_loop ) = poller {
            event_loop.shutdown( timeout );
        }
        // A tick racing with shutdown may have started a fresh loop
        let late = self.inner.poller.lock().unwrap_or_else( PoisonError::into_inner ).take();
        if let Some( event_loop ) = late {
            event_loop.shutdown( timeout );
        }
    }
}


impl Drop for Player {
    fn drop( &mut self ) {
        self.shutdown();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::{ HashMap, HashSet };
    use std::path::{ Path, PathBuf };
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use crate::backend::BackendError;
    use crate::observer::ChannelObserver;
    use crate::resolver::ResolveError;


    #[derive( Default )]
    struct FakeState {
        loaded: Option<PathBuf>,
        history: Vec<PathBuf>,
        playing: bool,
        paused: bool,
        ended: bool,
        volume: u8,
        position: f32,
        fail_load: bool,
    }


    #[derive( Clone, Default )]
    struct FakeBackend( Arc<Mutex<FakeState>> );

    impl FakeBackend {
        fn inner( &self ) -> MutexGuard<'_, FakeState> {
            self.0.lock().unwrap()
        }
    }

    impl AudioBackend for FakeBackend {
        fn load( &mut self, path: &Path ) -> Result<(), BackendError> {
            let mut s = self.inner();
            s.history.push( path.to_path_buf() );
            if s.fail_load {
                return Err( BackendError::Open( "rejected".into() ) );
            }
            s.loaded = Some( path.to_path_buf() );
            s.ended = false;
            Ok(())
        }

        fn play( &mut self ) -> Result<(), BackendError> {
            self.inner().playing = true;
            Ok(())
        }

        fn pause( &mut self ) {
            self.inner().paused = true;
        }

        fn resume( &mut self ) {
            self.inner().paused = false;
        }

        fn stop( &mut self ) {
            let mut s = self.inner();
            s.loaded = None;
            s.playing = false;
            s.paused = false;
        }

        fn set_volume( &mut self, volume: u8 ) {
            self.inner().volume = volume;
        }

        fn volume( &self ) -> u8 {
            self.0.lock().unwrap().volume
        }

        fn time_ms( &self ) -> u64 {
            ( self.0.lock().unwrap().position * 1000.0 ) as u64
        }

        fn length_ms( &self ) -> u64 {
            1000
        }

        fn set_position( &mut self, position: f32 ) -> Result<(), BackendError> {
            self.inner().position = position;
            Ok(())
        }

        fn state( &self ) -> BackendState {
            let s = self.0.lock().unwrap();
            match ( s.loaded.is_some(), s.ended, s.paused ) {
                ( false, _, _ ) => BackendState::Idle,
                ( true, true, _ ) => BackendState::Ended,
                ( true, false, true ) => BackendState::Paused,
                ( true, false, false ) => BackendState::Playing,
            }
        }
    }


    /// Serves tracks from local files by fs_id.
    #[derive( Default )]
    struct FakeResolver {
        files: HashMap<u64, PathBuf>,
        stale: Mutex<HashSet<u64>>,
        gone: HashSet<u64>,
        /// Simulated lookup latency
        delay: Duration,
    }

    impl TrackResolver for FakeResolver {
        fn is_valid( &self, track: &TrackReference ) -> bool {
            !self.stale.lock().unwrap().contains( &track.fs_id ) && !self.gone.contains( &track.fs_id )
        }

        fn refresh( &self, track: &TrackReference ) -> Option<TrackReference> {
            if self.gone.contains( &track.fs_id ) {
                return None;
            }
            self.stale.lock().unwrap().remove( &track.fs_id );
            let mut fresh = track.clone();
            fresh.size = 999;
            Some( fresh )
        }

        fn resolve_download_url( &self, track: &TrackReference ) -> Result<String, ResolveError> {
            thread::sleep( self.delay );
            let path = self.files.get( &track.fs_id ).ok_or( ResolveError::NotFound( track.fs_id ) )?;
            Ok( reqwest::Url::from_file_path( path ).unwrap().to_string() )
        }
    }


    struct Fixture {
        _dir: tempfile::TempDir,
        backend: FakeBackend,
        resolver: FakeResolver,
        playlist: Playlist,
    }


    fn fixture( count: u64 ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = FakeResolver::default();
        let mut playlist = Playlist::new( "demo", "" );

        for id in 1..=count {
            let name = format!( "track{}.mp3", id );
            let path = dir.path().join( &name );
            std::fs::write( &path, format!( "audio {}", id ) ).unwrap();
            resolver.files.insert( id, path );
            playlist.add_item( TrackReference::new( id, name.clone(), format!( "/music/{}", name ), 7 ) );
        }

        Fixture { _dir: dir, backend: FakeBackend::default(), resolver, playlist }
    }


    fn player_for( fixture: Fixture, options: PlayerOptions ) -> ( Player, FakeBackend, Arc<RwLock<Playlist>>, tempfile::TempDir ) {
        let Fixture { _dir, backend, resolver, playlist } = fixture;
        let player = Player::new( Box::new( backend.clone() ), options )
            .with_resolver( Arc::new( resolver ) );
        let shared = player.set_playlist_owned( playlist );
        ( player, backend, shared, _dir )
    }


    fn fast_options() -> PlayerOptions {
        PlayerOptions {
            poll_interval: Duration::from_millis( 10 ),
            ..PlayerOptions::default()
        }
    }


    #[test]
    fn test_demo_scenario() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 2 ), PlayerOptions::default() );
        player.set_play_mode( PlayMode::Loop );

        assert!( player.play( 0 ) );
        assert!( player.is_playing() );
        assert_eq!( player.current_track().unwrap().fs_id, 1 );
        assert_eq!( player.state(), PlaybackState::Playing );

        assert!( player.next() );
        assert_eq!( player.current_track().unwrap().fs_id, 2 );
        assert!( player.next() );
        assert_eq!( player.current_track().unwrap().fs_id, 1 );
        assert_eq!( player.current_index(), Some( 0 ) );
    }


    #[test]
    fn test_sequential_edges() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 3 ), PlayerOptions::default() );

        assert!( player.play( 2 ) );
        assert!( !player.next() );
        assert_eq!( player.current_index(), Some( 2 ) );
        assert!( player.is_playing() );

        assert!( player.play( 0 ) );
        assert!( !player.prev() );
        assert_eq!( player.current_index(), Some( 0 ) );
    }


    #[test]
    fn test_loop_wraparound() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 3 ), PlayerOptions::default() );
        player.set_play_mode( PlayMode::Loop );

        assert!( player.play( 2 ) );
        assert!( player.next() );
        assert_eq!( player.current_index(), Some( 0 ) );
        assert!( player.prev() );
        assert_eq!( player.current_index(), Some( 2 ) );
    }


    #[test]
    fn test_random_next_never_repeats() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 3 ), PlayerOptions::default() );
        player.set_play_mode( PlayMode::Random );
        assert!( player.play( 0 ) );

        let mut previous = player.current_index();
        for _ in 0..1000 {
            assert!( player.next() );
            let current = player.current_index();
            assert_ne!( current, previous );
            previous = current;
        }
    }


    #[test]
    fn test_random_mode_overrides_requested_index() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 2 ), PlayerOptions::default() );
        player.set_play_mode( PlayMode::Random );

        assert!( player.play( 0 ) );
        let first = player.current_index().unwrap();
        // Asking for the current track again always lands on the other one
        assert!( player.play( first ) );
        assert_eq!( player.current_index(), Some( 1 - first ) );
    }


    #[test]
    fn test_random_mode_can_honor_requested_index() {
        let options = PlayerOptions { honor_index_in_random: true, ..PlayerOptions::default() };
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 3 ), options );
        player.set_play_mode( PlayMode::Random );

        assert!( player.play( 1 ) );
        assert_eq!( player.current_index(), Some( 1 ) );
        assert!( player.play( 1 ) );
        assert_eq!( player.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_stop_is_idempotent_and_removes_scratch() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), PlayerOptions::default() );
        assert!( player.play( 0 ) );

        let scratch = backend.inner().loaded.clone().unwrap();
        assert!( scratch.exists() );
        assert!( scratch.to_string_lossy().ends_with( ".mp3" ) );

        assert!( player.stop() );
        assert!( player.stop() );
        assert!( !scratch.exists() );
        assert!( !player.is_playing() );
        assert_eq!( player.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_stop_during_download_removes_scratch() {
        let mut fixture = fixture( 1 );
        fixture.resolver.delay = Duration::from_millis( 300 );
        let ( player, backend, _playlist, _dir ) = player_for( fixture, PlayerOptions::default() );

        thread::scope( |scope| {
            let loading = scope.spawn( || player.play( 0 ) );
            thread::sleep( Duration::from_millis( 100 ) );
            assert!( player.stop() );
            assert!( loading.join().unwrap() );
        });

        let history = backend.inner().history.clone();
        assert_eq!( history.len(), 1 );
        assert!( history.iter().all( |path| !path.exists() ) );
        assert!( !player.is_playing() );
        assert_eq!( player.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_stop_during_completion_cancels_advance() {
        /// Holds the poll thread inside the completion callback until released.
        struct Gate {
            entered: Mutex<mpsc::Sender<()>>,
            release: Mutex<mpsc::Receiver<()>>,
        }

        impl PlayerObserver for Gate {
            fn on_complete( &self ) {
                let _ = self.entered.lock().unwrap().send(());
                let _ = self.release.lock().unwrap().recv_timeout( Duration::from_secs( 5 ) );
            }
        }

        let ( entered_tx, entered_rx ) = mpsc::channel();
        let ( release_tx, release_rx ) = mpsc::channel();
        let ( events_tx, events_rx ) = mpsc::channel();
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 2 ), fast_options() );
        player.add_observer( Arc::new( Gate { entered: Mutex::new( entered_tx ), release: Mutex::new( release_rx ) } ) );
        player.add_observer( Arc::new( ChannelObserver::new( events_tx ) ) );

        assert!( player.play( 0 ) );
        let scratch = backend.inner().loaded.clone().unwrap();
        backend.inner().ended = true;

        entered_rx.recv_timeout( Duration::from_secs( 5 ) ).unwrap();
        assert!( player.stop() );
        release_tx.send(()).unwrap();

        // Give the poll thread time to act on the stale completion
        thread::sleep( Duration::from_millis( 200 ) );

        assert_eq!( player.current_index(), Some( 0 ) );
        assert!( !player.is_playing() );
        assert!( !scratch.exists() );
        assert_eq!( backend.inner().history.len(), 1 );
        assert!( !events_rx.try_iter().any( |e| matches!( e, PlayerEvent::Next( _ ) ) ) );
    }


    #[test]
    fn test_stop_without_playback() {
        let player = Player::new( Box::new( FakeBackend::default() ), PlayerOptions::default() );
        assert!( player.stop() );
        assert!( !player.pause() );
        assert_eq!( player.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_play_rejects_bad_requests() {
        let player = Player::new( Box::new( FakeBackend::default() ), PlayerOptions::default() );
        assert!( !player.play( 0 ) );

        player.set_playlist_owned( Playlist::new( "empty", "" ) );
        assert!( !player.play( 0 ) );

        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 2 ), PlayerOptions::default() );
        assert!( !player.play( 2 ) );
        assert_eq!( player.state(), PlaybackState::Idle );
    }


    #[test]
    fn test_pause_toggles_and_notifies() {
        let ( tx, rx ) = mpsc::channel();
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), PlayerOptions::default() );
        player.add_observer( Arc::new( ChannelObserver::new( tx ) ) );

        assert!( player.play( 0 ) );
        assert!( player.pause() );
        assert!( player.is_paused() );
        assert!( backend.inner().paused );
        assert_eq!( player.state(), PlaybackState::Paused );

        assert!( player.pause() );
        assert!( !player.is_paused() );

        let events: Vec<_> = rx.try_iter().collect();
        let track = player.current_track().unwrap();
        assert_eq!( events, vec![
            PlayerEvent::Play( track.clone() ),
            PlayerEvent::Pause,
            PlayerEvent::Play( track ),
        ]);
    }


    #[test]
    fn test_invalid_track_is_refreshed_in_place() {
        let f = fixture( 2 );
        f.resolver.stale.lock().unwrap().insert( 2 );
        let ( player, _backend, playlist, _dir ) = player_for( f, PlayerOptions::default() );

        assert!( player.play( 1 ) );
        assert_eq!( player.current_track().unwrap().size, 999 );
        assert_eq!( playlist.read().unwrap().items[ 1 ].size, 999 );
        assert_eq!( playlist.read().unwrap().items[ 0 ].size, 7 );
    }


    #[test]
    fn test_unrefreshable_track_fails() {
        let mut f = fixture( 2 );
        f.resolver.gone.insert( 1 );
        let ( player, backend, _playlist, _dir ) = player_for( f, PlayerOptions::default() );

        assert!( !player.play( 0 ) );
        assert!( !player.is_playing() );
        assert_eq!( player.state(), PlaybackState::Stopped );
        assert!( backend.inner().history.is_empty() );
    }


    #[test]
    fn test_failed_download_leaves_engine_stopped() {
        let mut f = fixture( 1 );
        f.resolver.files.insert( 1, f._dir.path().join( "missing.mp3" ) );
        let ( player, backend, _playlist, _dir ) = player_for( f, PlayerOptions::default() );

        assert!( !player.play( 0 ) );
        assert_eq!( player.state(), PlaybackState::Stopped );
        assert!( backend.inner().history.is_empty() );
    }


    #[test]
    fn test_rejected_media_removes_scratch() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), PlayerOptions::default() );
        backend.inner().fail_load = true;

        assert!( !player.play( 0 ) );
        let attempted = backend.inner().history[ 0 ].clone();
        assert!( !attempted.exists() );
        assert_eq!( player.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_volume_and_mute() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), PlayerOptions::default() );

        assert_eq!( player.set_volume( 140 ), 100 );
        assert_eq!( player.set_volume( -5 ), 0 );
        assert_eq!( player.set_volume( 60 ), 60 );

        assert!( player.toggle_mute() );
        assert_eq!( backend.inner().volume, 0 );
        assert_eq!( player.volume(), 60 );

        assert!( player.play( 0 ) );
        assert_eq!( backend.inner().volume, 0 );
        assert!( !player.toggle_mute() );
        assert_eq!( backend.inner().volume, 60 );
    }


    #[test]
    fn test_position_is_zero_when_not_playing() {
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 1 ), PlayerOptions::default() );
        assert_eq!( player.get_time(), 0 );
        assert_eq!( player.get_length(), 0 );
        assert!( !player.set_position( 0.5 ) );

        assert!( player.play( 0 ) );
        assert!( player.set_position( 1.7 ) );
        assert_eq!( player.get_time(), 1000 );
        assert_eq!( player.get_length(), 1000 );
        assert_eq!( player.get_position(), 1.0 );
    }


    #[test]
    fn test_poll_loop_advances_on_completion() {
        let ( tx, rx ) = mpsc::channel();
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 2 ), fast_options() );
        player.add_observer( Arc::new( ChannelObserver::new( tx ) ) );

        assert!( player.play( 0 ) );
        backend.inner().ended = true;

        let mut events = Vec::new();
        while let Ok( event ) = rx.recv_timeout( Duration::from_secs( 5 ) ) {
            let done = matches!( event, PlayerEvent::Next( _ ) );
            events.push( event );
            if done {
                break;
            }
        }

        assert_eq!( player.current_index(), Some( 1 ) );
        assert!( player.is_playing() );
        let second = player.current_track().unwrap();
        assert_eq!( second.fs_id, 2 );
        assert!( events.contains( &PlayerEvent::Complete ) );
        assert_eq!( &events[ events.len() - 2.. ], &[ PlayerEvent::Play( second.clone() ), PlayerEvent::Next( second ) ] );
    }


    #[test]
    fn test_completion_at_end_tears_down_session() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), fast_options() );
        assert!( player.play( 0 ) );
        let scratch = backend.inner().loaded.clone().unwrap();
        backend.inner().ended = true;

        let deadline = Instant::now() + Duration::from_secs( 5 );
        while scratch.exists() && Instant::now() < deadline {
            thread::sleep( Duration::from_millis( 10 ) );
        }
        assert!( !scratch.exists() );
        assert!( !player.is_playing() );
        assert_eq!( player.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_observer_panic_does_not_corrupt_state() {
        struct Exploding;
        impl PlayerObserver for Exploding {
            fn on_play( &self, _track: &TrackReference ) {
                panic!( "hook failure" );
            }
        }

        let ( tx, rx ) = mpsc::channel();
        let ( player, _backend, _playlist, _dir ) = player_for( fixture( 2 ), PlayerOptions::default() );
        player.add_observer( Arc::new( Exploding ) );
        player.add_observer( Arc::new( ChannelObserver::new( tx ) ) );

        assert!( player.play( 0 ) );
        assert!( player.is_playing() );
        assert!( matches!( rx.try_recv(), Ok( PlayerEvent::Play( _ ) ) ) );
        assert!( player.next() );
        assert_eq!( player.current_index(), Some( 1 ) );
    }


    #[test]
    fn test_started_tracks_are_recorded_as_recent() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = PlaylistStore::open( store_dir.path() ).unwrap();
        let Fixture { _dir, backend, resolver, playlist } = fixture( 2 );
        let player = Player::new( Box::new( backend ), PlayerOptions::default() )
            .with_resolver( Arc::new( resolver ) )
            .with_store( PlaylistStore::open( store_dir.path() ).unwrap() );
        player.set_playlist_owned( playlist );

        assert!( player.play( 0 ) );
        assert!( player.next() );

        let ids: Vec<u64> = store.recent().items.iter().map( |t| t.fs_id ).collect();
        assert_eq!( ids, vec![ 2, 1 ] );
    }


    #[test]
    fn test_set_playlist_resets_session() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 2 ), PlayerOptions::default() );
        assert!( player.play( 1 ) );
        let scratch = backend.inner().loaded.clone().unwrap();

        player.set_playlist_owned( Playlist::new( "other", "" ) );
        assert!( !scratch.exists() );
        assert_eq!( player.current_index(), None );
        assert!( player.current_track().is_none() );
        assert_eq!( player.state(), PlaybackState::Idle );
        assert_eq!( player.status().playlist.as_deref(), Some( "other" ) );
    }


    #[test]
    fn test_drop_removes_scratch() {
        let ( player, backend, _playlist, _dir ) = player_for( fixture( 1 ), fast_options() );
        assert!( player.play( 0 ) );
        let scratch = backend.inner().loaded.clone().unwrap();

        drop( player );
        assert!( !scratch.exists() );
    }
}
