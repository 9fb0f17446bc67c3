//! Background poll loop
//!
//! Runs a tick callback at a fixed interval on its own thread until told to
//! stop or until the callback reports that its owner is gone.

use std::io;
use std::sync::mpsc::{ self, Receiver, RecvTimeoutError, Sender };
use std::thread;
use std::time::Duration;


/// Handle to a running poll thread.
pub struct EventLoop {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}


impl EventLoop {
    /// Spawns the poll thread.
    ///
    /// @param interval - Time between ticks
    /// @param tick - Called once per interval; returning false ends the loop
    pub fn spawn<F>( interval: Duration, mut tick: F ) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let ( stop_tx, stop_rx ) = mpsc::channel::<()>();
        let ( done_tx, done_rx ) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name( "panmusic-poll".into() )
            .spawn( move || {
                loop {
                    match stop_rx.recv_timeout( interval ) {
                        Err( RecvTimeoutError::Timeout ) => {
                            if !tick() {
                                tracing::debug!( "Poll loop: owner gone" );
                                break;
                            }
                        }
                        Ok(()) | Err( RecvTimeoutError::Disconnected ) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        tracing::debug!( "Poll loop started ({:?} interval)", interval );
        Ok( Self { stop_tx, done_rx, thread: Some( thread ) } )
    }


    /// Returns true while the poll thread has not exited.
    pub fn is_running( &self ) -> bool {
        self.thread.as_ref().is_some_and( |t| !t.is_finished() )
    }


    /// Signals the thread to stop without waiting for it.
    pub fn signal( &self ) {
        let _ = self.stop_tx.send(());
    }


    /// Stops the thread, waiting at most `timeout` for it to finish.
    ///
    /// Returns false if the thread was still busy and had to be detached.
    pub fn shutdown( mut self, timeout: Duration ) -> bool {
        self.signal();

        match self.done_rx.recv_timeout( timeout ) {
            Ok(()) | Err( RecvTimeoutError::Disconnected ) => {
                if let Some( thread ) = self.thread.take() {
                    let _ = thread.join();
                }
                tracing::debug!( "Poll loop stopped" );
                true
            }
            Err( RecvTimeoutError::Timeout ) => {
                tracing::warn!( "Poll loop did not stop within {:?}; detaching", timeout );
                self.thread.take();
                false
            }
        }
    }
}


impl Drop for EventLoop {
    fn drop( &mut self ) {
        self.signal();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::time::Instant;


    #[test]
    fn test_ticks_until_shutdown() {
        let ticks = Arc::new( AtomicUsize::new( 0 ) );
        let counter = Arc::clone( &ticks );
        let event_loop = EventLoop::spawn( Duration::from_millis( 10 ), move || {
            counter.fetch_add( 1, Ordering::SeqCst );
            true
        }).unwrap();

        thread::sleep( Duration::from_millis( 100 ) );
        assert!( event_loop.is_running() );
        assert!( event_loop.shutdown( Duration::from_secs( 1 ) ) );

        let seen = ticks.load( Ordering::SeqCst );
        assert!( seen >= 2 );
        thread::sleep( Duration::from_millis( 50 ) );
        assert_eq!( ticks.load( Ordering::SeqCst ), seen );
    }


    #[test]
    fn test_tick_returning_false_ends_loop() {
        let event_loop = EventLoop::spawn( Duration::from_millis( 5 ), || false ).unwrap();
        thread::sleep( Duration::from_millis( 100 ) );
        assert!( !event_loop.is_running() );
        assert!( event_loop.shutdown( Duration::from_millis( 100 ) ) );
    }


    #[test]
    fn test_shutdown_is_bounded() {
        let event_loop = EventLoop::spawn( Duration::from_millis( 1 ), || {
            thread::sleep( Duration::from_millis( 500 ) );
            true
        }).unwrap();
        thread::sleep( Duration::from_millis( 20 ) );

        let started = Instant::now();
        assert!( !event_loop.shutdown( Duration::from_millis( 50 ) ) );
        assert!( started.elapsed() < Duration::from_millis( 400 ) );
    }
}
