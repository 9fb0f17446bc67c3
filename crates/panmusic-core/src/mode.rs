//! Play mode policies
//!
//! A play mode decides which track index follows the current one.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{ Deserialize, Serialize };


/// How the next/previous track is chosen.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum PlayMode {
    /// Stop at either end of the playlist.
    #[default]
    Sequential,

    /// Wrap around at both ends.
    Loop,

    /// Uniformly random, never repeating the current track.
    Random,
}


impl PlayMode {
    /// The policy implementing this mode.
    pub fn policy( self ) -> &'static dyn ModePolicy {
        match self {
            PlayMode::Sequential => &Sequential,
            PlayMode::Loop => &Looping,
            PlayMode::Random => &Shuffle,
        }
    }


    /// Next mode in the sequential → loop → random cycle.
    pub fn cycle( self ) -> Self {
        match self {
            PlayMode::Sequential => PlayMode::Loop,
            PlayMode::Loop => PlayMode::Random,
            PlayMode::Random => PlayMode::Sequential,
        }
    }


    pub fn as_str( self ) -> &'static str {
        match self {
            PlayMode::Sequential => "sequential",
            PlayMode::Loop => "loop",
            PlayMode::Random => "random",
        }
    }
}


impl fmt::Display for PlayMode {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.write_str( self.as_str() )
    }
}


impl FromStr for PlayMode {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "seq" => Ok( PlayMode::Sequential ),
            "loop" | "repeat" => Ok( PlayMode::Loop ),
            "random" | "shuffle" => Ok( PlayMode::Random ),
            _ => Err( format!( "Invalid play mode: '{}'. Use 'sequential', 'loop', or 'random'", s ) ),
        }
    }
}


/// Index arithmetic for one play mode.
///
/// `current` is `None` when no track has been played yet. A `None` result
/// means there is no track to move to.
pub trait ModePolicy: Send + Sync {
    fn next_index( &self, current: Option<usize>, len: usize ) -> Option<usize>;

    fn prev_index( &self, current: Option<usize>, len: usize ) -> Option<usize>;

    /// Index to use when playback of `requested` is asked for explicitly.
    fn start_index( &self, requested: usize, _current: Option<usize>, _len: usize ) -> usize {
        requested
    }
}


/// Plays through once, in order.
pub struct Sequential;


impl ModePolicy for Sequential {
    fn next_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        let next = current.map_or( 0, |i| i + 1 );
        ( next < len ).then_some( next )
    }


    fn prev_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        current
            .and_then( |i| i.checked_sub( 1 ) )
            .filter( |&i| i < len )
    }
}


/// Wraps around at both ends.
pub struct Looping;


impl ModePolicy for Looping {
    fn next_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some( current.map_or( 0, |i| ( i + 1 ) % len ) )
    }


    fn prev_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        match current {
            Some( i ) if i > 0 && i <= len => Some( i - 1 ),
            _ => Some( len - 1 ),
        }
    }
}


/// Random pick that avoids repeating the current track.
pub struct Shuffle;


impl Shuffle {
    fn pick( current: Option<usize>, len: usize ) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let mut rng = rand::rng();
        loop {
            let index = rng.random_range( 0..len );
            if len == 1 || Some( index ) != current {
                return Some( index );
            }
        }
    }
}


impl ModePolicy for Shuffle {
    fn next_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        Self::pick( current, len )
    }


    fn prev_index( &self, current: Option<usize>, len: usize ) -> Option<usize> {
        Self::pick( current, len )
    }


    /// Explicit requests are overridden by a random pick.
    fn start_index( &self, requested: usize, current: Option<usize>, len: usize ) -> usize {
        Self::pick( current, len ).unwrap_or( requested )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_sequential_edges() {
        let p = PlayMode::Sequential.policy();
        assert_eq!( p.next_index( None, 3 ), Some( 0 ) );
        assert_eq!( p.next_index( Some( 1 ), 3 ), Some( 2 ) );
        assert_eq!( p.next_index( Some( 2 ), 3 ), None );
        assert_eq!( p.prev_index( Some( 0 ), 3 ), None );
        assert_eq!( p.prev_index( None, 3 ), None );
        assert_eq!( p.prev_index( Some( 2 ), 3 ), Some( 1 ) );
        assert_eq!( p.next_index( None, 0 ), None );
    }


    #[test]
    fn test_loop_wraps() {
        let p = PlayMode::Loop.policy();
        assert_eq!( p.next_index( Some( 2 ), 3 ), Some( 0 ) );
        assert_eq!( p.prev_index( Some( 0 ), 3 ), Some( 2 ) );
        assert_eq!( p.prev_index( None, 3 ), Some( 2 ) );
        assert_eq!( p.next_index( None, 3 ), Some( 0 ) );
        assert_eq!( p.next_index( Some( 0 ), 0 ), None );
    }


    #[test]
    fn test_random_never_repeats() {
        let p = PlayMode::Random.policy();
        let mut current = Some( 0 );
        for _ in 0..1000 {
            let next = p.next_index( current, 4 ).unwrap();
            assert!( next < 4 );
            assert_ne!( Some( next ), current );
            current = Some( next );
        }
    }


    #[test]
    fn test_random_single_track() {
        let p = PlayMode::Random.policy();
        assert_eq!( p.next_index( Some( 0 ), 1 ), Some( 0 ) );
        assert_eq!( p.start_index( 0, Some( 0 ), 1 ), 0 );
    }


    #[test]
    fn test_start_index_honored_outside_random() {
        assert_eq!( PlayMode::Sequential.policy().start_index( 2, None, 3 ), 2 );
        assert_eq!( PlayMode::Loop.policy().start_index( 1, Some( 1 ), 3 ), 1 );
    }


    #[test]
    fn test_parse_and_cycle() {
        assert_eq!( "LOOP".parse::<PlayMode>().unwrap(), PlayMode::Loop );
        assert!( "forward".parse::<PlayMode>().is_err() );
        assert_eq!( PlayMode::Random.cycle(), PlayMode::Sequential );
        assert_eq!( PlayMode::Loop.to_string(), "loop" );
    }
}
