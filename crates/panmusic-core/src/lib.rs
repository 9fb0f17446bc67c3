//! panmusic Core - Cloud drive playback engine
//!
//! This crate provides the core functionality for playing audio stored on a
//! remote drive: track references, persisted playlists, play modes,
//! download materialization, audio output, and the playback engine.

pub mod backend;
pub mod command;
pub mod decoder;
pub mod device;
pub mod event_loop;
pub mod materialize;
pub mod mode;
pub mod observer;
pub mod output;
pub mod player;
pub mod playlist;
pub mod resolver;
pub mod track;

pub use backend::{ AudioBackend, BackendError, BackendState };
pub use command::{ Command, CommandError };
pub use decoder::AudioMetadata;
pub use device::DeviceBackend;
pub use materialize::{ materialize, FetchPolicy, MaterializeError };
pub use mode::{ ModePolicy, PlayMode };
pub use observer::{ ChannelObserver, ObserverRegistry, PlayerEvent, PlayerObserver };
pub use player::{ PlaybackState, Player, PlayerOptions, PlayerStatus };
pub use playlist::{ Playlist, PlaylistError, PlaylistStore, SortKey, RECENT_PLAYLIST_NAME };
pub use resolver::{ ResolveError, TrackResolver };
pub use track::TrackReference;
