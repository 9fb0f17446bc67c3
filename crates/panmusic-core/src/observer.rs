//! Player event observers
//!
//! Observers are notified of transport changes after the player has released
//! its locks, so a hook may call back into the player freely.

use std::panic::{ self, AssertUnwindSafe };
use std::sync::{ Arc, Mutex, PoisonError };
use std::sync::mpsc::Sender;

use crate::track::TrackReference;


/// Transport events emitted by the player.
#[derive( Debug, Clone, PartialEq )]
pub enum PlayerEvent {
    /// A track started playing, or playback resumed.
    Play( TrackReference ),
    Pause,
    Stop,
    Next( TrackReference ),
    Prev( TrackReference ),
    /// The current track played to its end.
    Complete,
}


/// Receives player notifications. Every hook defaults to a no-op.
pub trait PlayerObserver: Send + Sync {
    fn on_play( &self, _track: &TrackReference ) {}

    fn on_pause( &self ) {}

    fn on_stop( &self ) {}

    fn on_next( &self, _track: &TrackReference ) {}

    fn on_prev( &self, _track: &TrackReference ) {}

    fn on_complete( &self ) {}
}


/// Registered observers, in registration order.
#[derive( Default )]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Arc<dyn PlayerObserver>>>,
}


impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn register( &self, observer: Arc<dyn PlayerObserver> ) {
        self.observers.lock().unwrap_or_else( PoisonError::into_inner ).push( observer );
    }


    pub fn len( &self ) -> usize {
        self.observers.lock().unwrap_or_else( PoisonError::into_inner ).len()
    }


    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }


    /// Delivers `event` to every observer.
    ///
    /// A panicking observer is logged and skipped; the remaining observers
    /// still receive the event.
    pub fn dispatch( &self, event: &PlayerEvent ) {
        // Snapshot so hooks can register observers without deadlocking
        let observers = self.observers.lock().unwrap_or_else( PoisonError::into_inner ).clone();

        for observer in observers {
            let result = panic::catch_unwind( AssertUnwindSafe( || deliver( observer.as_ref(), event ) ) );
            if result.is_err() {
                tracing::error!( "Observer panicked while handling {:?}", event );
            }
        }
    }
}


fn deliver( observer: &dyn PlayerObserver, event: &PlayerEvent ) {
    match event {
        PlayerEvent::Play( track ) => observer.on_play( track ),
        PlayerEvent::Pause => observer.on_pause(),
        PlayerEvent::Stop => observer.on_stop(),
        PlayerEvent::Next( track ) => observer.on_next( track ),
        PlayerEvent::Prev( track ) => observer.on_prev( track ),
        PlayerEvent::Complete => observer.on_complete(),
    }
}


/// Forwards every event into a channel.
pub struct ChannelObserver {
    tx: Mutex<Sender<PlayerEvent>>,
}


impl ChannelObserver {
    pub fn new( tx: Sender<PlayerEvent> ) -> Self {
        Self { tx: Mutex::new( tx ) }
    }


    fn send( &self, event: PlayerEvent ) {
        // A closed receiver just means nobody is listening any more
        let _ = self.tx.lock().unwrap_or_else( PoisonError::into_inner ).send( event );
    }
}


impl PlayerObserver for ChannelObserver {
    fn on_play( &self, track: &TrackReference ) {
        self.send( PlayerEvent::Play( track.clone() ) );
    }


    fn on_pause( &self ) {
        self.send( PlayerEvent::Pause );
    }


    fn on_stop( &self ) {
        self.send( PlayerEvent::Stop );
    }


    fn on_next( &self, track: &TrackReference ) {
        self.send( PlayerEvent::Next( track.clone() ) );
    }


    fn on_prev( &self, track: &TrackReference ) {
        self.send( PlayerEvent::Prev( track.clone() ) );
    }


    fn on_complete( &self ) {
        self.send( PlayerEvent::Complete );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::atomic::{ AtomicUsize, Ordering };


    struct Panicky;

    impl PlayerObserver for Panicky {
        fn on_stop( &self ) {
            panic!( "observer failure" );
        }
    }


    #[derive( Default )]
    struct Counter( AtomicUsize );

    impl PlayerObserver for Counter {
        fn on_stop( &self ) {
            self.0.fetch_add( 1, Ordering::SeqCst );
        }
    }


    #[test]
    fn test_default_hooks_are_noops() {
        struct Silent;
        impl PlayerObserver for Silent {}

        let registry = ObserverRegistry::new();
        registry.register( Arc::new( Silent ) );
        registry.dispatch( &PlayerEvent::Complete );
        registry.dispatch( &PlayerEvent::Play( TrackReference::new( 1, "a.mp3", "/a.mp3", 1 ) ) );
        assert_eq!( registry.len(), 1 );
    }


    #[test]
    fn test_panicking_observer_is_isolated() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new( Counter::default() );
        registry.register( Arc::new( Panicky ) );
        registry.register( counter.clone() );

        registry.dispatch( &PlayerEvent::Stop );
        registry.dispatch( &PlayerEvent::Stop );
        assert_eq!( counter.0.load( Ordering::SeqCst ), 2 );
    }


    #[test]
    fn test_channel_observer_forwards_events() {
        let ( tx, rx ) = mpsc::channel();
        let registry = ObserverRegistry::new();
        registry.register( Arc::new( ChannelObserver::new( tx ) ) );

        let track = TrackReference::new( 7, "b.flac", "/b.flac", 10 );
        registry.dispatch( &PlayerEvent::Next( track.clone() ) );
        registry.dispatch( &PlayerEvent::Pause );

        assert_eq!( rx.recv().unwrap(), PlayerEvent::Next( track ) );
        assert_eq!( rx.recv().unwrap(), PlayerEvent::Pause );
    }


    #[test]
    fn test_channel_observer_tolerates_closed_receiver() {
        let ( tx, rx ) = mpsc::channel();
        drop( rx );
        ChannelObserver::new( tx ).on_complete();
    }
}
